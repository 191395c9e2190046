//! Tests for the beacon registry

use super::*;
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn test_create_and_die() {
    let registry = Arc::new(BeaconRegistry::new());

    let beacon = registry.create(json!({ "job": "export" }));
    assert_eq!(registry.live_count(), 1);
    assert!(!beacon.is_dead());

    let live = registry.live();
    assert_eq!(live[0].id, beacon.id());
    assert_eq!(live[0].context, json!({ "job": "export" }));

    beacon.die().await;
    assert!(beacon.is_dead());
    assert_eq!(registry.live_count(), 0);
}

#[tokio::test]
async fn test_double_die_removes_only_own_entry() {
    let registry = Arc::new(BeaconRegistry::new());

    let first = registry.create(json!(null));
    let second = registry.create(json!(null));

    first.die().await;
    first.die().await;

    assert_eq!(registry.live_count(), 1);
    assert_eq!(registry.live()[0].id, second.id());
}

#[tokio::test]
async fn test_wait_until_drained_returns_immediately_when_empty() {
    let registry = BeaconRegistry::new();

    let result = tokio::time::timeout(Duration::from_millis(100), registry.wait_until_drained()).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_wait_until_drained_waits_for_every_beacon() {
    let registry = Arc::new(BeaconRegistry::new());
    let first = registry.create(json!({ "n": 1 }));
    let second = registry.create(json!({ "n": 2 }));

    let waiter = tokio::spawn({
        let registry = registry.clone();
        async move { registry.wait_until_drained().await }
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    first.die().await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished(), "One beacon is still live");

    second.die().await;
    let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
    assert!(result.is_ok(), "Waiter finishes once the last beacon dies");
}

#[test]
fn test_describe_includes_context() {
    let registry = Arc::new(BeaconRegistry::new());
    let beacon = registry.create(json!({ "request": "abc" }));

    let text = describe(&registry.live());
    assert!(text.contains("\"request\":\"abc\""));
    assert!(text.contains(&format!("\"id\":\"{}\"", beacon.id())));
}
