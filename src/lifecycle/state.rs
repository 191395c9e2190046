//! Readiness and shutdown state shared by the probes and the coordinator
//!
//! `ready` is what the application last signalled. The readiness the
//! probes report is `ready && no blocking tasks are pending`.

use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Lifecycle phase of one lightship instance
///
/// `ShuttingDown` is entered at most once; `Terminated` only on forced
/// termination and is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Running,
    ShuttingDown,
    Terminated,
}

#[derive(Debug)]
struct Register {
    ready: bool,
    blocking_tasks: usize,
    lifecycle: LifecycleState,
}

/// Readiness/liveness register with blocking-task bookkeeping
#[derive(Debug)]
pub(crate) struct StateRegister {
    register: Mutex<Register>,
    lifecycle: watch::Sender<LifecycleState>,
    first_ready: watch::Sender<bool>,
}

impl StateRegister {
    pub(crate) fn new() -> Self {
        let (lifecycle, _) = watch::channel(LifecycleState::Running);
        let (first_ready, _) = watch::channel(false);
        Self {
            register: Mutex::new(Register {
                ready: false,
                blocking_tasks: 0,
                lifecycle: LifecycleState::Running,
            }),
            lifecycle,
            first_ready,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Register> {
        self.register.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark the application ready; ignored once shutdown has started
    pub(crate) fn signal_ready(&self) {
        let mut register = self.lock();
        if register.lifecycle != LifecycleState::Running {
            warn!("Server is already shutting down; ignoring ready signal");
            return;
        }
        register.ready = true;
        debug!("Server signalled ready");
        if register.blocking_tasks == 0 {
            self.resolve_first_ready();
        }
    }

    /// Mark the application not ready; ignored once shutdown has started
    pub(crate) fn signal_not_ready(&self) {
        let mut register = self.lock();
        if register.lifecycle != LifecycleState::Running {
            warn!("Server is already shutting down; ignoring not-ready signal");
            return;
        }
        register.ready = false;
        debug!("Server signalled not ready");
    }

    /// Readiness as reported by `/ready`
    pub(crate) fn is_ready(&self) -> bool {
        let register = self.lock();
        if register.blocking_tasks > 0 {
            debug!(
                blocking_tasks = register.blocking_tasks,
                "Server is not ready because there are blocking tasks"
            );
            return false;
        }
        register.ready
    }

    /// The last explicit ready/not-ready value, ignoring blocking tasks
    pub(crate) fn signalled_ready(&self) -> bool {
        self.lock().ready
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.lock().lifecycle != LifecycleState::Running
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.lock().lifecycle == LifecycleState::Terminated
    }

    pub(crate) fn lifecycle(&self) -> LifecycleState {
        self.lock().lifecycle
    }

    pub(crate) fn blocking_tasks(&self) -> usize {
        self.lock().blocking_tasks
    }

    /// Move from `Running` to `ShuttingDown`
    ///
    /// Returns false if shutdown already started. The check and the state
    /// change happen under one lock, so concurrent triggers cannot both win.
    pub(crate) fn begin_shutdown(&self, next_ready: bool) -> bool {
        let mut register = self.lock();
        if register.lifecycle != LifecycleState::Running {
            return false;
        }
        register.lifecycle = LifecycleState::ShuttingDown;
        register.ready = next_ready;
        self.lifecycle.send_replace(LifecycleState::ShuttingDown);
        true
    }

    /// Move to `Terminated`; returns false if already terminated
    pub(crate) fn mark_terminated(&self) -> bool {
        let mut register = self.lock();
        if register.lifecycle == LifecycleState::Terminated {
            return false;
        }
        register.lifecycle = LifecycleState::Terminated;
        self.lifecycle.send_replace(LifecycleState::Terminated);
        true
    }

    pub(crate) fn blocking_task_queued(&self) {
        let mut register = self.lock();
        register.blocking_tasks += 1;
        debug!(
            blocking_tasks = register.blocking_tasks,
            "Blocking task queued"
        );
    }

    /// Remove one finished blocking task
    ///
    /// A successful task that leaves the set empty while the server is
    /// ready resolves the first-ready signal.
    pub(crate) fn blocking_task_finished(&self, succeeded: bool) {
        let mut register = self.lock();
        register.blocking_tasks = register.blocking_tasks.saturating_sub(1);
        debug!(
            blocking_tasks = register.blocking_tasks,
            succeeded, "Blocking task finished"
        );
        if succeeded && register.blocking_tasks == 0 && register.ready {
            self.resolve_first_ready();
        }
    }

    fn resolve_first_ready(&self) {
        let resolved = self.first_ready.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        });
        if resolved {
            info!("Server is ready for the first time");
        }
    }

    #[cfg(test)]
    pub(crate) fn has_been_ready(&self) -> bool {
        *self.first_ready.borrow()
    }

    /// Wait until the server has been ready at least once
    pub(crate) async fn when_first_ready(&self) {
        let mut receiver = self.first_ready.subscribe();
        while !*receiver.borrow_and_update() {
            if receiver.changed().await.is_err() {
                break;
            }
        }
    }

    /// Wait until forced termination has been requested
    pub(crate) async fn when_terminated(&self) {
        let mut receiver = self.lifecycle.subscribe();
        while *receiver.borrow_and_update() != LifecycleState::Terminated {
            if receiver.changed().await.is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
