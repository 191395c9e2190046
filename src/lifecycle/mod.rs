//! Process lifecycle for Kubernetes probes
//!
//! [`Lightship`] owns one instance of every piece of lifecycle state:
//! - readiness/shutdown register
//! - blocking tasks that hold readiness down
//! - beacons that hold the shutdown handlers back
//! - the shutdown handlers themselves
//!
//! Instances share nothing, so tests can build as many as they like.

pub(crate) mod beacon;
mod coordinator;
pub(crate) mod state;

pub use beacon::{BeaconContext, BeaconController, BeaconEntry};
pub use coordinator::EXIT_GRACE_PERIOD;
pub use state::LifecycleState;

use crate::config::{is_kubernetes, ConfigError, LightshipConfig, ShutdownSignalKind};
use crate::server::metrics::LifecycleMetrics;
use crate::server::shutdown::{install_signal_bridge, shutdown_channel};
use crate::server::{bind_probe_listener, run_probe_server, ListenMode, ProbeState};
use crate::server::{ShutdownController, ShutdownSignal};
use beacon::BeaconRegistry;
use coordinator::ShutdownHandlers;
use futures::FutureExt;
use state::StateRegister;
use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum LightshipError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to bind probe listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to register {signal} handler: {source}")]
    Signal {
        signal: ShutdownSignalKind,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create metrics registry: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// State shared by the handle, the probe server, timers and signal tasks
pub(crate) struct Inner {
    pub(crate) config: LightshipConfig,
    pub(crate) state: Arc<StateRegister>,
    pub(crate) beacons: Arc<BeaconRegistry>,
    pub(crate) handlers: ShutdownHandlers,
    pub(crate) listener: ShutdownController,
    pub(crate) metrics: Arc<LifecycleMetrics>,
}

/// Handle returned to the embedding application
///
/// Cheap to clone; all clones drive the same instance.
#[derive(Clone)]
pub struct Lightship {
    inner: Arc<Inner>,
    local_addr: SocketAddr,
    closed: ShutdownSignal,
}

impl Lightship {
    /// Validate the configuration, start the probe server and, when running
    /// under Kubernetes, install the shutdown signal handlers
    pub async fn new(config: LightshipConfig) -> Result<Self, LightshipError> {
        config.validate()?;

        let mode = ListenMode::resolve(config.detect_kubernetes, is_kubernetes(), config.port);
        if mode == ListenMode::Local {
            warn!("Could not detect Kubernetes; running in local mode without signal handlers");
        }

        let metrics = Arc::new(LifecycleMetrics::new()?);
        let listener = bind_probe_listener(mode)
            .await
            .map_err(|source| LightshipError::Bind {
                addr: mode.socket_addr(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| LightshipError::Bind {
            addr: mode.socket_addr(),
            source,
        })?;

        let (controller, closed) = shutdown_channel();
        let inner = Arc::new(Inner {
            config,
            state: Arc::new(StateRegister::new()),
            beacons: Arc::new(BeaconRegistry::new()),
            handlers: ShutdownHandlers::default(),
            listener: controller,
            metrics,
        });

        if mode != ListenMode::Local {
            let weak = Arc::downgrade(&inner);
            install_signal_bridge(&inner.config.signals, move |signal| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                info!(signal = %signal, "Received shutdown signal");
                tokio::spawn(async move { coordinator::run_shutdown(&inner, false).await });
            })
            .map_err(|(signal, source)| LightshipError::Signal { signal, source })?;
        }

        let probe_state = ProbeState::new(
            inner.state.clone(),
            inner.beacons.clone(),
            inner.metrics.clone(),
        );
        let server_closed = closed.clone();
        tokio::spawn(async move {
            if let Err(e) = run_probe_server(listener, probe_state, server_closed).await {
                warn!(error = %e, "Probe server failed");
            }
        });
        info!(addr = %local_addr, mode = ?mode, "Probe server listening");

        Ok(Self {
            inner,
            local_addr,
            closed,
        })
    }

    /// Address the probe server is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &LightshipConfig {
        &self.inner.config
    }

    pub fn signal_ready(&self) {
        self.inner.state.signal_ready();
    }

    pub fn signal_not_ready(&self) {
        self.inner.state.signal_not_ready();
    }

    /// Ready and no blocking task pending
    pub fn is_server_ready(&self) -> bool {
        self.inner.state.is_ready()
    }

    pub fn is_server_shutting_down(&self) -> bool {
        self.inner.state.is_shutting_down()
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.inner.state.lifecycle()
    }

    /// Register a handler to run once during shutdown, after earlier ones
    pub fn register_shutdown_handler<F, Fut>(&self, handler: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.inner.handlers.push(handler);
        debug!(
            handlers = self.inner.handlers.len(),
            "Shutdown handler registered"
        );
    }

    pub fn create_beacon(&self) -> BeaconController {
        self.create_beacon_with_context(BeaconContext::Null)
    }

    /// Create a live beacon; the context only shows up in diagnostics
    pub fn create_beacon_with_context(&self, context: BeaconContext) -> BeaconController {
        self.inner.beacons.create(context)
    }

    /// Live beacons, in creation order
    pub fn live_beacons(&self) -> Vec<BeaconEntry> {
        self.inner.beacons.live()
    }

    /// Hold readiness down until `task` completes
    ///
    /// A task that fails (or panics) starts the shutdown sequence.
    pub fn queue_blocking_task<F>(&self, task: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.inner.state.blocking_task_queued();

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(task).catch_unwind().await;
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(format!("{:?}", e)),
                Err(panic) => Some(coordinator::panic_message(panic.as_ref())),
            };
            inner.state.blocking_task_finished(failure.is_none());

            if let Some(failure) = failure {
                inner.metrics.blocking_task_errors.inc();
                error!(error = %failure, "Blocking task failed; shutting down");
                coordinator::run_shutdown(&inner, false).await;
            }
        });
    }

    /// Start the shutdown sequence and wait for it to finish
    ///
    /// Calling this while a shutdown is in progress returns immediately.
    pub async fn shutdown(&self) {
        coordinator::run_shutdown(&self.inner, false).await;
    }

    /// Resolves once the server has been ready with no blocking tasks
    pub async fn when_first_ready(&self) {
        self.inner.state.when_first_ready().await;
    }

    /// Fires when the probe listener closes at the end of the shutdown
    /// sequence, or on forced termination
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.closed.clone()
    }
}

#[cfg(test)]
pub(crate) mod testing;

#[cfg(test)]
#[path = "lightship_test.rs"]
mod tests;
