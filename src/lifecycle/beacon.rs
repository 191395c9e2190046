//! Beacons: outstanding work that holds back the shutdown handlers
//!
//! A beacon is created live and dies exactly once. The registry keeps the
//! live beacons in a `watch` channel so the coordinator re-checks the set on
//! every change without missing one.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

/// Caller-supplied diagnostic context attached to a beacon
pub type BeaconContext = serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct BeaconEntry {
    pub id: Uuid,
    pub context: BeaconContext,
}

#[derive(Debug)]
pub(crate) struct BeaconRegistry {
    beacons: watch::Sender<Vec<BeaconEntry>>,
}

impl BeaconRegistry {
    pub(crate) fn new() -> Self {
        let (beacons, _) = watch::channel(Vec::new());
        Self { beacons }
    }

    pub(crate) fn create(self: &Arc<Self>, context: BeaconContext) -> BeaconController {
        let entry = BeaconEntry {
            id: Uuid::new_v4(),
            context,
        };
        let id = entry.id;
        self.beacons.send_modify(|beacons| beacons.push(entry));
        debug!(beacon = %id, live = self.live_count(), "Beacon created");

        BeaconController {
            id,
            registry: self.clone(),
            dead: AtomicBool::new(false),
        }
    }

    pub(crate) fn live_count(&self) -> usize {
        self.beacons.borrow().len()
    }

    pub(crate) fn live(&self) -> Vec<BeaconEntry> {
        self.beacons.borrow().clone()
    }

    fn remove(&self, id: Uuid) {
        self.beacons
            .send_modify(|beacons| beacons.retain(|beacon| beacon.id != id));
    }

    /// Wait until no beacon is live
    ///
    /// Checks once immediately, then again after every change to the set.
    pub(crate) async fn wait_until_drained(&self) {
        let mut receiver = self.beacons.subscribe();
        loop {
            let live = receiver.borrow_and_update().clone();
            debug!("Checking for live beacons");
            if live.is_empty() {
                info!("No live beacons; proceeding with shutdown");
                return;
            }
            info!(
                beacons = %describe(&live),
                "Shutdown is on hold because there are live beacons"
            );
            if receiver.changed().await.is_err() {
                return;
            }
        }
    }
}

fn describe(beacons: &[BeaconEntry]) -> String {
    serde_json::to_string(beacons).unwrap_or_else(|e| format!("<unserializable: {}>", e))
}

/// Handle for one beacon, owned by whoever created it
#[derive(Debug)]
pub struct BeaconController {
    id: Uuid,
    registry: Arc<BeaconRegistry>,
    dead: AtomicBool,
}

impl BeaconController {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }

    /// Mark the beacon dead and wake anyone waiting on the beacon set
    ///
    /// Calling this again is a no-op. Returns after yielding once to the
    /// scheduler, so waiters reacting to the change get to run first.
    pub async fn die(&self) {
        if self.dead.swap(true, Ordering::SeqCst) {
            debug!(beacon = %self.id, "Beacon is already dead");
            return;
        }
        self.registry.remove(self.id);
        debug!(
            beacon = %self.id,
            live = self.registry.live_count(),
            "Beacon died"
        );
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
#[path = "beacon_test.rs"]
mod tests;
