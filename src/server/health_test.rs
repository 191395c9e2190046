//! Tests for probe endpoints

use super::*;
use crate::lifecycle::testing::{test_config, test_lightship, TerminationCounter};
use std::time::Duration;

fn view(shutting_down: bool, ready: bool, effective_ready: bool) -> ProbeView {
    ProbeView {
        shutting_down,
        ready,
        effective_ready,
    }
}

#[test]
fn test_health_probe_responses() {
    assert_eq!(
        probe_response(Probe::Health, view(true, true, true)),
        (StatusCode::INTERNAL_SERVER_ERROR, "SHUTTING_DOWN")
    );
    assert_eq!(
        probe_response(Probe::Health, view(false, true, false)),
        (StatusCode::OK, "READY")
    );
    assert_eq!(
        probe_response(Probe::Health, view(false, false, false)),
        (StatusCode::INTERNAL_SERVER_ERROR, "NOT_READY")
    );
}

#[test]
fn test_live_probe_responses() {
    assert_eq!(
        probe_response(Probe::Live, view(true, false, false)),
        (StatusCode::INTERNAL_SERVER_ERROR, "SHUTTING_DOWN")
    );
    assert_eq!(
        probe_response(Probe::Live, view(false, false, false)),
        (StatusCode::OK, "NOT_SHUTTING_DOWN")
    );
}

#[test]
fn test_ready_probe_uses_effective_readiness() {
    assert_eq!(
        probe_response(Probe::Ready, view(false, true, true)),
        (StatusCode::OK, "READY")
    );
    // Signalled ready but a blocking task is pending
    assert_eq!(
        probe_response(Probe::Ready, view(false, true, false)),
        (StatusCode::INTERNAL_SERVER_ERROR, "NOT_READY")
    );
}

#[test]
fn test_listen_mode_resolution() {
    assert_eq!(ListenMode::resolve(true, false, 9000), ListenMode::Local);
    assert_eq!(
        ListenMode::resolve(true, true, 9000),
        ListenMode::Cluster { port: 9000 }
    );
    assert_eq!(
        ListenMode::resolve(false, false, 9100),
        ListenMode::Cluster { port: 9100 }
    );

    assert!(ListenMode::Local.socket_addr().ip().is_loopback());
    assert_eq!(ListenMode::Local.socket_addr().port(), 0);
    assert!(ListenMode::Cluster { port: 9000 }
        .socket_addr()
        .ip()
        .is_unspecified());
}

async fn get(client: &reqwest::Client, addr: SocketAddr, path: &str) -> (u16, String) {
    let response = client
        .get(format!("http://127.0.0.1:{}{}", addr.port(), path))
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .expect("Failed to connect to probe server");
    let status = response.status().as_u16();
    let body = response.text().await.expect("Failed to read body");
    (status, body)
}

/// Probes follow ready/not-ready signals before shutdown
#[tokio::test]
async fn test_probes_follow_ready_signals() {
    let terminations = TerminationCounter::default();
    let lightship = test_lightship(test_config(&terminations)).await;
    let addr = lightship.local_addr();
    let client = reqwest::Client::new();

    assert_eq!(get(&client, addr, "/health").await, (500, "NOT_READY".into()));
    assert_eq!(get(&client, addr, "/ready").await, (500, "NOT_READY".into()));
    assert_eq!(
        get(&client, addr, "/live").await,
        (200, "NOT_SHUTTING_DOWN".into())
    );

    lightship.signal_ready();
    assert_eq!(get(&client, addr, "/health").await, (200, "READY".into()));
    assert_eq!(get(&client, addr, "/ready").await, (200, "READY".into()));

    lightship.signal_not_ready();
    assert_eq!(get(&client, addr, "/health").await, (500, "NOT_READY".into()));
    assert_eq!(get(&client, addr, "/ready").await, (500, "NOT_READY".into()));
    assert_eq!(
        get(&client, addr, "/live").await,
        (200, "NOT_SHUTTING_DOWN".into())
    );
}

/// HEAD mirrors GET status codes with an empty body
#[tokio::test]
async fn test_head_requests_mirror_status() {
    let terminations = TerminationCounter::default();
    let lightship = test_lightship(test_config(&terminations)).await;
    let addr = lightship.local_addr();
    let client = reqwest::Client::new();

    lightship.signal_ready();

    for (path, expected) in [("/health", 200), ("/live", 200), ("/ready", 200)] {
        let response = client
            .head(format!("http://127.0.0.1:{}{}", addr.port(), path))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .expect("Failed to connect to probe server");
        assert_eq!(response.status().as_u16(), expected, "HEAD {}", path);
        let body = response.text().await.expect("Failed to read body");
        assert!(body.is_empty(), "HEAD {} should have no body", path);
    }
}

/// Probes report shutting down as soon as shutdown starts, while handlers
/// are still pending
#[tokio::test]
async fn test_probes_report_shutting_down_during_handlers() {
    let terminations = TerminationCounter::default();
    let lightship = test_lightship(test_config(&terminations)).await;
    let addr = lightship.local_addr();
    let client = reqwest::Client::new();

    lightship.signal_ready();
    let (release, released) = tokio::sync::oneshot::channel::<()>();
    lightship.register_shutdown_handler(|| async move {
        let _ = released.await;
        Ok(())
    });

    let shutting_down = lightship.clone();
    let sequence = tokio::spawn(async move { shutting_down.shutdown().await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(
        get(&client, addr, "/health").await,
        (500, "SHUTTING_DOWN".into())
    );
    assert_eq!(
        get(&client, addr, "/live").await,
        (500, "SHUTTING_DOWN".into())
    );
    assert_eq!(get(&client, addr, "/ready").await, (500, "NOT_READY".into()));

    let _ = release.send(());
    tokio::time::timeout(Duration::from_secs(5), sequence)
        .await
        .expect("Shutdown sequence should finish")
        .expect("Shutdown task panicked");
}

/// Blocking tasks hold `/ready` down but not `/health`
#[tokio::test]
async fn test_ready_probe_reflects_blocking_tasks() {
    let terminations = TerminationCounter::default();
    let lightship = test_lightship(test_config(&terminations)).await;
    let addr = lightship.local_addr();
    let client = reqwest::Client::new();

    lightship.signal_ready();
    let (finish, finished) = tokio::sync::oneshot::channel::<()>();
    lightship.queue_blocking_task(async move {
        let _ = finished.await;
        Ok(())
    });

    assert_eq!(get(&client, addr, "/ready").await, (500, "NOT_READY".into()));
    assert_eq!(get(&client, addr, "/health").await, (200, "READY".into()));

    let _ = finish.send(());
    tokio::time::timeout(Duration::from_secs(5), lightship.when_first_ready())
        .await
        .expect("First ready should resolve");
    assert_eq!(get(&client, addr, "/ready").await, (200, "READY".into()));
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let terminations = TerminationCounter::default();
    let lightship = test_lightship(test_config(&terminations)).await;
    let addr = lightship.local_addr();
    let client = reqwest::Client::new();

    lightship.signal_ready();
    let _beacon = lightship.create_beacon();

    let (status, body) = get(&client, addr, "/metrics").await;
    assert_eq!(status, 200);
    assert!(body.contains("lightship_ready 1"));
    assert!(body.contains("lightship_live_beacons 1"));
    assert!(body.contains("lightship_shutting_down 0"));
}

/// The listener closes once the shutdown sequence completes
#[tokio::test]
async fn test_listener_closes_after_shutdown() {
    let terminations = TerminationCounter::default();
    let lightship = test_lightship(test_config(&terminations)).await;
    let addr = lightship.local_addr();

    lightship.shutdown().await;

    let mut closed = lightship.shutdown_signal();
    tokio::time::timeout(Duration::from_secs(1), closed.wait())
        .await
        .expect("Shutdown signal should fire");

    // Give the server task a moment to stop accepting
    tokio::time::sleep(Duration::from_millis(100)).await;
    let result = reqwest::Client::new()
        .get(format!("http://127.0.0.1:{}/live", addr.port()))
        .timeout(Duration::from_secs(1))
        .send()
        .await;
    assert!(result.is_err(), "Probe listener should be closed");
}
