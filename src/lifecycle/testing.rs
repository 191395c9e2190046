//! Helpers for building isolated lightship instances in tests

use crate::config::LightshipConfig;
use crate::lifecycle::Lightship;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Counts calls to the terminate action instead of exiting
#[derive(Clone, Default)]
pub(crate) struct TerminationCounter {
    calls: Arc<AtomicUsize>,
}

impl TerminationCounter {
    pub(crate) fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Config bound to an ephemeral port with no signal handlers and no delay
pub(crate) fn test_config(terminations: &TerminationCounter) -> LightshipConfig {
    let calls = terminations.calls.clone();
    LightshipConfig {
        port: 0,
        detect_kubernetes: false,
        signals: Vec::new(),
        graceful_shutdown_timeout: Some(Duration::from_secs(30)),
        shutdown_handler_timeout: Some(Duration::from_secs(5)),
        shutdown_delay: Duration::ZERO,
        terminate: Arc::new(move || {
            calls.fetch_add(1, Ordering::SeqCst);
        }),
    }
}

#[allow(clippy::expect_used)]
pub(crate) async fn test_lightship(config: LightshipConfig) -> Lightship {
    Lightship::new(config)
        .await
        .expect("Failed to start test lightship")
}

/// Shared call log for asserting handler order
#[derive(Clone, Default)]
pub(crate) struct CallLog {
    calls: Arc<std::sync::Mutex<Vec<&'static str>>>,
}

#[allow(clippy::expect_used)]
impl CallLog {
    pub(crate) fn record(&self, name: &'static str) {
        self.calls.lock().expect("CallLog lock poisoned").push(name);
    }

    pub(crate) fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().expect("CallLog lock poisoned").clone()
    }
}
