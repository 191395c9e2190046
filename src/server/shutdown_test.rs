//! Tests for the listener shutdown channel and signal bridge

use super::shutdown::*;
use crate::config::ShutdownSignalKind;
use std::time::Duration;

/// Test that shutdown channel works correctly
#[tokio::test]
async fn test_shutdown_channel_initially_not_shutdown() {
    let (controller, signal) = shutdown_channel();

    assert!(!signal.is_shutdown());
    assert!(!controller.is_shutdown());
}

/// Test that shutdown can be triggered
#[tokio::test]
async fn test_shutdown_channel_triggers_shutdown() {
    let (controller, signal) = shutdown_channel();

    controller.shutdown();

    assert!(signal.is_shutdown());
    assert!(controller.is_shutdown());
}

/// Triggering twice is harmless
#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let (controller, mut signal) = shutdown_channel();

    controller.shutdown();
    controller.shutdown();

    let result = tokio::time::timeout(Duration::from_millis(100), signal.wait()).await;
    assert!(result.is_ok());
}

/// Test that wait completes when shutdown is triggered
#[tokio::test]
async fn test_shutdown_wait_completes_on_signal() {
    let (controller, mut signal) = shutdown_channel();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        controller.shutdown();
    });

    let result = tokio::time::timeout(Duration::from_secs(1), signal.wait()).await;

    assert!(
        result.is_ok(),
        "wait() should complete when shutdown triggered"
    );
    assert!(signal.is_shutdown());
}

/// Dropping the controller releases waiters
#[tokio::test]
async fn test_shutdown_wait_completes_when_controller_dropped() {
    let (controller, mut signal) = shutdown_channel();
    drop(controller);

    let result = tokio::time::timeout(Duration::from_millis(100), signal.wait()).await;
    assert!(result.is_ok());
}

/// Test that cloned signals all receive shutdown
#[tokio::test]
async fn test_shutdown_signal_clones_share_state() {
    let (controller, signal) = shutdown_channel();
    let signal2 = signal.clone();
    let signal3 = signal.clone();

    controller.shutdown();

    assert!(signal.is_shutdown());
    assert!(signal2.is_shutdown());
    assert!(signal3.is_shutdown());
}

/// A delivered signal reaches the callback
#[cfg(unix)]
#[tokio::test]
async fn test_signal_bridge_invokes_callback() {
    let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel();

    install_signal_bridge(&[ShutdownSignalKind::User1], move |kind| {
        let _ = sender.send(kind);
    })
    .expect("Failed to install signal bridge");

    std::process::Command::new("kill")
        .arg("-USR1")
        .arg(std::process::id().to_string())
        .status()
        .expect("Failed to run kill");

    let received = tokio::time::timeout(Duration::from_secs(5), receiver.recv()).await;
    assert_eq!(received.ok().flatten(), Some(ShutdownSignalKind::User1));
}

#[cfg(unix)]
#[tokio::test]
async fn test_signal_bridge_with_no_signals_is_noop() {
    let result = install_signal_bridge(&[], |_| {});
    assert!(result.is_ok());
}
