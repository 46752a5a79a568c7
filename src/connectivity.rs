// PoseSync - Multi-sensor orientation synchronization
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Tracking of wirelessly linked child devices
//!
//! The [`ConnectivityTracker`] is registered on the master device as a
//! listener. Its membership is state based: the most recent event per
//! identity decides whether that identity is in the set.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;

use crate::hardware::DeviceListener;
use crate::metrics::SessionMetrics;
use crate::types::{ConnectivityState, DeviceIdentity};

/// Thread-safe set of currently linked child devices
#[derive(Debug, Default)]
pub struct ConnectivityTracker {
    connected: Mutex<BTreeSet<DeviceIdentity>>,
    metrics: Option<Arc<SessionMetrics>>,
}

impl ConnectivityTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tracker that counts events into `metrics`
    pub fn with_metrics(metrics: Arc<SessionMetrics>) -> Self {
        Self {
            connected: Mutex::new(BTreeSet::new()),
            metrics: Some(metrics),
        }
    }

    // A listener that panicked mid-update leaves the set itself consistent.
    fn members(&self) -> MutexGuard<'_, BTreeSet<DeviceIdentity>> {
        self.connected.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a connectivity event
    ///
    /// `Wireless` inserts the identity, every other state removes it.
    /// Re-applying the same event leaves the set unchanged. Returns true if
    /// membership changed.
    pub fn connectivity_changed(&self, device: &DeviceIdentity, state: ConnectivityState) -> bool {
        if let Some(metrics) = &self.metrics {
            metrics.record_connectivity_event();
        }
        let changed = {
            let mut connected = self.members();
            if state.is_linked() {
                connected.insert(device.clone())
            } else {
                connected.remove(device)
            }
        };
        if changed {
            debug!("{} -> {:?}", device, state);
        }
        changed
    }

    /// Copy of the current membership, in serial order
    pub fn snapshot(&self) -> Vec<DeviceIdentity> {
        self.members().iter().cloned().collect()
    }

    /// Number of linked devices
    pub fn count(&self) -> usize {
        self.members().len()
    }

    /// Whether `device` is currently linked
    pub fn contains(&self, device: &DeviceIdentity) -> bool {
        self.members().contains(device)
    }

    /// Forget every device
    pub fn clear(&self) {
        self.members().clear();
    }
}

impl DeviceListener for ConnectivityTracker {
    fn on_connectivity_changed(&self, device: &DeviceIdentity, state: ConnectivityState) {
        self.connectivity_changed(device, state);
    }
}
