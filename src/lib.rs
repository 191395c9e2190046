//! Lifecycle coordination for processes probed by Kubernetes
//!
//! ```no_run
//! use lightship::{Lightship, LightshipConfig};
//!
//! # async fn run() -> Result<(), lightship::LightshipError> {
//! let lightship = Lightship::new(LightshipConfig::default()).await?;
//!
//! lightship.register_shutdown_handler(|| async {
//!     // close listeners, flush queues
//!     Ok(())
//! });
//! lightship.signal_ready();
//!
//! lightship.shutdown_signal().wait().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod lifecycle;
pub mod server;

pub use config::{LightshipConfig, ProcessExit, ShutdownSignalKind, Terminate};
pub use lifecycle::{
    BeaconContext, BeaconController, BeaconEntry, LifecycleState, Lightship, LightshipError,
};
pub use server::ShutdownSignal;
