//! Shutdown sequence
//!
//! Runs once per instance:
//! 1. Flip to shutting down (readiness and liveness probes start failing)
//! 2. Wait `shutdown_delay` so the kubelet sees the failing probes
//! 3. Wait for live beacons to die
//! 4. Run shutdown handlers one by one, in registration order
//! 5. Close the probe listener and arm the exit watchdog
//!
//! Steps 2-4 run under the graceful shutdown timeout, step 4 also under the
//! shutdown handler timeout. Either timer firing forces termination.

use super::Inner;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

/// How long to wait for the process to exit on its own after the sequence
pub const EXIT_GRACE_PERIOD: Duration = Duration::from_secs(1);

type BoxedHandler = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Registered shutdown handlers, run first-in first-out
#[derive(Default)]
pub(crate) struct ShutdownHandlers {
    queue: Mutex<VecDeque<BoxedHandler>>,
}

impl ShutdownHandlers {
    pub(crate) fn push<F, Fut>(&self, handler: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        // Calling the handler inside the async block turns a panic in its
        // synchronous prologue into a panic of the future.
        let boxed: BoxedHandler = Box::new(move || async move { handler().await }.boxed());
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(boxed);
    }

    fn pop(&self) -> Option<BoxedHandler> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Timer that forces termination unless dropped first
///
/// Holds only a weak reference to the instance, and aborting the task on
/// drop releases the timer.
struct Watchdog {
    handle: AbortHandle,
}

impl Watchdog {
    fn arm(inner: &Arc<Inner>, timeout: Option<Duration>, reason: &'static str) -> Option<Self> {
        let timeout = timeout?;
        let handle = spawn_termination_timer(Arc::downgrade(inner), timeout, reason);
        Some(Self { handle })
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn spawn_termination_timer(
    inner: Weak<Inner>,
    after: Duration,
    reason: &'static str,
) -> AbortHandle {
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        if let Some(inner) = inner.upgrade() {
            force_terminate(&inner, reason);
        }
    })
    .abort_handle()
}

/// Run the shutdown sequence; a no-op if it already started
pub(crate) async fn run_shutdown(inner: &Arc<Inner>, next_ready: bool) {
    if !inner.state.begin_shutdown(next_ready) {
        warn!("Server is already shutting down");
        return;
    }
    info!(next_ready, "Shutdown sequence started");

    let graceful = Watchdog::arm(
        inner,
        inner.config.graceful_shutdown_timeout,
        "graceful shutdown timeout",
    );

    let delay = inner.config.shutdown_delay;
    if !delay.is_zero() {
        info!(delay_ms = delay.as_millis() as u64, "Delaying shutdown handlers");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = inner.state.when_terminated() => {
                warn!("Stopped shutdown delay after forced termination");
                return;
            }
        }
    }

    if inner.beacons.live_count() > 0 {
        tokio::select! {
            _ = inner.beacons.wait_until_drained() => {}
            _ = inner.state.when_terminated() => {
                warn!("Stopped waiting for live beacons after forced termination");
                return;
            }
        }
    }

    let handler_timeout = Watchdog::arm(
        inner,
        inner.config.shutdown_handler_timeout,
        "shutdown handler timeout",
    );
    let completed = run_handlers(inner).await;
    drop(handler_timeout);
    drop(graceful);

    if !completed {
        return;
    }
    debug!("All shutdown handlers have run to completion; closing probe listener");
    inner.listener.shutdown();

    spawn_termination_timer(
        Arc::downgrade(inner),
        EXIT_GRACE_PERIOD,
        "process did not exit on its own; investigate what keeps the runtime alive",
    );
}

/// Run handlers sequentially; returns false if termination cut them short
async fn run_handlers(inner: &Inner) -> bool {
    debug!(count = inner.handlers.len(), "Running shutdown handlers");

    let mut index = 0usize;
    while let Some(handler) = inner.handlers.pop() {
        if inner.state.is_terminated() {
            warn!(
                remaining = inner.handlers.len() + 1,
                "Skipping shutdown handlers after forced termination"
            );
            return false;
        }

        match AssertUnwindSafe(handler()).catch_unwind().await {
            Ok(Ok(())) => debug!(handler = index, "Shutdown handler completed"),
            Ok(Err(e)) => {
                inner.metrics.shutdown_handler_errors.inc();
                error!(handler = index, error = ?e, "Shutdown handler produced an error");
            }
            Err(panic) => {
                inner.metrics.shutdown_handler_errors.inc();
                error!(
                    handler = index,
                    panic = %panic_message(panic.as_ref()),
                    "Shutdown handler panicked"
                );
            }
        }
        index += 1;
    }

    !inner.state.is_terminated()
}

/// Invoke the configured terminate action, at most once per instance
pub(crate) fn force_terminate(inner: &Inner, reason: &'static str) {
    if !inner.state.mark_terminated() {
        debug!(reason, "Termination already requested");
        return;
    }
    warn!(reason, "Forcing termination");
    inner.metrics.forced_terminations.inc();
    inner.listener.shutdown();
    inner.config.terminate.terminate();
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
#[path = "coordinator_test.rs"]
mod tests;
