//! HTTP server for probe and metrics endpoints
//!
//! Provides Kubernetes probes:
//! - `/health` - Combined state
//! - `/live` - Liveness probe (fails once shutting down)
//! - `/ready` - Readiness probe (ready with no blocking tasks)
//!
//! Also bridges SIGTERM/SIGHUP/SIGINT into the shutdown sequence.

mod health;
pub mod metrics;
pub mod shutdown;

pub use health::{
    bind_probe_listener, probe_response, run_probe_server, ListenMode, Probe, ProbeState,
    ProbeView,
};
pub use shutdown::{shutdown_channel, ShutdownController, ShutdownSignal};

#[cfg(test)]
#[path = "shutdown_test.rs"]
mod shutdown_tests;
