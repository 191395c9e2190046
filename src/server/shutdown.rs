//! Shutdown plumbing for the probe server
//!
//! - `shutdown_channel()` pairs the controller the coordinator fires when the
//!   probe listener should close with the signal the server and the embedding
//!   application wait on
//! - `install_signal_bridge()` turns OS signals into shutdown triggers

use crate::config::ShutdownSignalKind;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Receiving half of the listener-close channel
///
/// Cloned and handed to every component that has to stop with the probes.
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Wait for shutdown signal
    pub async fn wait(&mut self) {
        while !*self.receiver.borrow_and_update() {
            if self.receiver.changed().await.is_err() {
                // Sender dropped, treat as shutdown
                break;
            }
        }
    }

    /// Check if shutdown was signaled (non-blocking)
    pub fn is_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }
}

/// Controller for closing the probe listener
#[derive(Debug)]
pub struct ShutdownController {
    sender: watch::Sender<bool>,
}

impl ShutdownController {
    /// Trigger shutdown; repeated calls are harmless
    pub fn shutdown(&self) {
        if !self.sender.send_replace(true) {
            info!("Probe listener shutdown signal sent");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }
}

/// Create a new shutdown signal pair
///
/// Returns (controller, signal) where:
/// - controller: Used to trigger shutdown
/// - signal: Cloned and passed to components that need to listen
pub fn shutdown_channel() -> (ShutdownController, ShutdownSignal) {
    let (sender, receiver) = watch::channel(false);
    (ShutdownController { sender }, ShutdownSignal { receiver })
}

/// Call `on_signal` every time one of `signals` is delivered
///
/// All handlers are registered before any listener task starts, so a failed
/// registration leaves nothing behind. Must run inside a tokio runtime.
#[cfg(unix)]
pub fn install_signal_bridge<F>(
    signals: &[ShutdownSignalKind],
    on_signal: F,
) -> Result<(), (ShutdownSignalKind, std::io::Error)>
where
    F: Fn(ShutdownSignalKind) + Send + Sync + 'static,
{
    use tokio::signal::unix::{signal, SignalKind};

    let mut streams = Vec::with_capacity(signals.len());
    for &kind in signals {
        let os_kind = match kind {
            ShutdownSignalKind::Terminate => SignalKind::terminate(),
            ShutdownSignalKind::Hangup => SignalKind::hangup(),
            ShutdownSignalKind::Interrupt => SignalKind::interrupt(),
            ShutdownSignalKind::Quit => SignalKind::quit(),
            ShutdownSignalKind::User1 => SignalKind::user_defined1(),
            ShutdownSignalKind::User2 => SignalKind::user_defined2(),
        };
        let stream = signal(os_kind).map_err(|e| (kind, e))?;
        streams.push((kind, stream));
    }

    let on_signal = Arc::new(on_signal);
    for (kind, mut stream) in streams {
        let on_signal = on_signal.clone();
        tokio::spawn(async move {
            while stream.recv().await.is_some() {
                info!(signal = %kind, "Received signal");
                on_signal(kind);
            }
        });
        info!(signal = %kind, "Signal handler installed");
    }
    Ok(())
}

/// Ctrl+C is the only shutdown signal outside unix
#[cfg(not(unix))]
pub fn install_signal_bridge<F>(
    signals: &[ShutdownSignalKind],
    on_signal: F,
) -> Result<(), (ShutdownSignalKind, std::io::Error)>
where
    F: Fn(ShutdownSignalKind) + Send + Sync + 'static,
{
    let on_signal = Arc::new(on_signal);
    for &kind in signals {
        if kind != ShutdownSignalKind::Interrupt {
            tracing::warn!(signal = %kind, "Signal not supported on this platform; ignoring");
            continue;
        }
        let on_signal = on_signal.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                info!(signal = %kind, "Received Ctrl+C");
                on_signal(kind);
            }
        });
    }
    Ok(())
}
