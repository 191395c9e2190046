//! Probe endpoints for Kubernetes
//!
//! - `/health` - Overall health: shutting down, ready or not ready
//! - `/live` - Liveness: fails only once shutdown has started
//! - `/ready` - Readiness: ready and no blocking tasks pending
//! - `/metrics` - Prometheus metrics in text format
//!
//! HEAD requests get the same status codes with an empty body.

use crate::lifecycle::beacon::BeaconRegistry;
use crate::lifecycle::state::StateRegister;
use crate::server::metrics::LifecycleMetrics;
use crate::server::shutdown::ShutdownSignal;
use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Which endpoint is being probed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Health,
    Live,
    Ready,
}

/// Point-in-time view of the state register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeView {
    pub shutting_down: bool,
    /// Last explicit ready/not-ready signal
    pub ready: bool,
    /// `ready` with no blocking tasks pending
    pub effective_ready: bool,
}

/// Map a probe and the current state to a status code and body
pub fn probe_response(probe: Probe, view: ProbeView) -> (StatusCode, &'static str) {
    match probe {
        Probe::Health if view.shutting_down => (StatusCode::INTERNAL_SERVER_ERROR, "SHUTTING_DOWN"),
        Probe::Health if view.ready => (StatusCode::OK, "READY"),
        Probe::Health => (StatusCode::INTERNAL_SERVER_ERROR, "NOT_READY"),
        Probe::Live if view.shutting_down => (StatusCode::INTERNAL_SERVER_ERROR, "SHUTTING_DOWN"),
        Probe::Live => (StatusCode::OK, "NOT_SHUTTING_DOWN"),
        Probe::Ready if view.effective_ready => (StatusCode::OK, "READY"),
        Probe::Ready => (StatusCode::INTERNAL_SERVER_ERROR, "NOT_READY"),
    }
}

/// Where the probe listener binds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenMode {
    /// Outside Kubernetes: loopback, ephemeral port, no signal handlers
    Local,
    /// Inside Kubernetes (or detection disabled): all interfaces
    Cluster { port: u16 },
}

impl ListenMode {
    pub fn resolve(detect_kubernetes: bool, in_kubernetes: bool, port: u16) -> Self {
        if detect_kubernetes && !in_kubernetes {
            ListenMode::Local
        } else {
            ListenMode::Cluster { port }
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        match self {
            ListenMode::Local => SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            ListenMode::Cluster { port } => SocketAddr::from((Ipv4Addr::UNSPECIFIED, *port)),
        }
    }
}

/// Shared state for the probe handlers
#[derive(Clone)]
pub struct ProbeState {
    state: Arc<StateRegister>,
    beacons: Arc<BeaconRegistry>,
    metrics: Arc<LifecycleMetrics>,
}

impl ProbeState {
    pub(crate) fn new(
        state: Arc<StateRegister>,
        beacons: Arc<BeaconRegistry>,
        metrics: Arc<LifecycleMetrics>,
    ) -> Self {
        Self {
            state,
            beacons,
            metrics,
        }
    }

    fn view(&self) -> ProbeView {
        ProbeView {
            shutting_down: self.state.is_shutting_down(),
            ready: self.state.signalled_ready(),
            effective_ready: self.state.is_ready(),
        }
    }
}

async fn health(State(state): State<ProbeState>) -> (StatusCode, &'static str) {
    probe_response(Probe::Health, state.view())
}

async fn live(State(state): State<ProbeState>) -> (StatusCode, &'static str) {
    probe_response(Probe::Live, state.view())
}

async fn ready(State(state): State<ProbeState>) -> (StatusCode, &'static str) {
    probe_response(Probe::Ready, state.view())
}

/// Prometheus metrics handler
///
/// Returns metrics in Prometheus text format for scraping.
async fn metrics(State(state): State<ProbeState>) -> impl IntoResponse {
    let view = state.view();
    state.metrics.ready.set(i64::from(view.effective_ready));
    state.metrics.shutting_down.set(i64::from(view.shutting_down));
    state
        .metrics
        .live_beacons
        .set(i64::try_from(state.beacons.live_count()).unwrap_or(i64::MAX));
    state
        .metrics
        .blocking_tasks
        .set(i64::try_from(state.state.blocking_tasks()).unwrap_or(i64::MAX));

    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response(),
    }
}

/// Build the router for the probe and metrics endpoints
pub(crate) fn build_router(state: ProbeState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/live", get(live))
        .route("/ready", get(ready))
        .route("/metrics", get(self::metrics))
        .with_state(state)
}

pub async fn bind_probe_listener(mode: ListenMode) -> Result<TcpListener, std::io::Error> {
    TcpListener::bind(mode.socket_addr()).await
}

/// Serve the probe endpoints until `closed` fires
pub async fn run_probe_server(
    listener: TcpListener,
    state: ProbeState,
    mut closed: ShutdownSignal,
) -> Result<(), std::io::Error> {
    let app = build_router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { closed.wait().await })
        .await?;

    info!("Probe server stopped");
    Ok(())
}

#[cfg(test)]
#[path = "health_test.rs"]
mod tests;
