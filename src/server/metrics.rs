//! Prometheus metrics for the lifecycle
//!
//! Gauges are refreshed from the state register on every scrape; counters
//! are bumped where the events happen.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

/// Metric registry owned by one lightship instance
pub struct LifecycleMetrics {
    registry: Registry,
    pub ready: IntGauge,
    pub shutting_down: IntGauge,
    pub live_beacons: IntGauge,
    pub blocking_tasks: IntGauge,
    pub shutdown_handler_errors: IntCounter,
    pub blocking_task_errors: IntCounter,
    pub forced_terminations: IntCounter,
}

impl LifecycleMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let ready = IntGauge::new(
            "lightship_ready",
            "1 if the server reports ready on /ready",
        )?;
        let shutting_down = IntGauge::new(
            "lightship_shutting_down",
            "1 once the shutdown sequence has started",
        )?;
        let live_beacons = IntGauge::new(
            "lightship_live_beacons",
            "Number of live beacons holding back shutdown",
        )?;
        let blocking_tasks = IntGauge::new(
            "lightship_blocking_tasks",
            "Number of pending blocking tasks holding readiness down",
        )?;
        let shutdown_handler_errors = IntCounter::new(
            "lightship_shutdown_handler_errors_total",
            "Shutdown handlers that returned an error or panicked",
        )?;
        let blocking_task_errors = IntCounter::new(
            "lightship_blocking_task_errors_total",
            "Blocking tasks that failed and triggered shutdown",
        )?;
        let forced_terminations = IntCounter::new(
            "lightship_forced_terminations_total",
            "Times the terminate action was invoked",
        )?;

        registry.register(Box::new(ready.clone()))?;
        registry.register(Box::new(shutting_down.clone()))?;
        registry.register(Box::new(live_beacons.clone()))?;
        registry.register(Box::new(blocking_tasks.clone()))?;
        registry.register(Box::new(shutdown_handler_errors.clone()))?;
        registry.register(Box::new(blocking_task_errors.clone()))?;
        registry.register(Box::new(forced_terminations.clone()))?;

        Ok(Self {
            registry,
            ready,
            shutting_down,
            live_beacons,
            blocking_tasks,
            shutdown_handler_errors,
            blocking_task_errors,
            forced_terminations,
        })
    }

    /// Encode all metrics in Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
