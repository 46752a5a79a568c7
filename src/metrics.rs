// PoseSync - Multi-sensor orientation synchronization
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Session statistics
//!
//! Counters are updated from hardware-event threads and the aggregation
//! thread alike, so they are plain relaxed atomics. A [`MetricsSnapshot`]
//! copies them out; fields of one snapshot are not mutually consistent.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live counters for one session
#[derive(Debug, Default)]
pub struct SessionMetrics {
    samples_received: AtomicU64,
    samples_dropped: AtomicU64,
    samples_aggregated: AtomicU64,
    ticks: AtomicU64,
    connectivity_events: AtomicU64,
    calibrations: AtomicU64,
}

/// Point-in-time copy of [`SessionMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Samples delivered by the hardware for tracked devices
    pub samples_received: u64,
    /// Samples discarded because a queue was full
    pub samples_dropped: u64,
    /// Samples written into segment slots
    pub samples_aggregated: u64,
    /// Aggregation sweeps performed
    pub ticks: u64,
    /// Connectivity notifications observed
    pub connectivity_events: u64,
    /// Reference poses captured
    pub calibrations: u64,
}

impl SessionMetrics {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_received(&self) {
        self.samples_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.samples_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_aggregated(&self, count: u64) {
        self.samples_aggregated.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_connectivity_event(&self) {
        self.connectivity_events.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_calibration(&self) {
        self.calibrations.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            samples_received: self.samples_received.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
            samples_aggregated: self.samples_aggregated.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
            connectivity_events: self.connectivity_events.load(Ordering::Relaxed),
            calibrations: self.calibrations.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSnapshot {
    /// Fraction of received samples lost to queue overflow
    pub fn drop_ratio(&self) -> f64 {
        if self.samples_received == 0 {
            return 0.0;
        }
        self.samples_dropped as f64 / self.samples_received as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new_is_zero() {
        let metrics = SessionMetrics::new();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_metrics_counts() {
        let metrics = SessionMetrics::new();
        metrics.record_received();
        metrics.record_received();
        metrics.record_dropped();
        metrics.record_aggregated(3);
        metrics.record_tick();
        let snap = metrics.snapshot();
        assert_eq!(snap.samples_received, 2);
        assert_eq!(snap.samples_dropped, 1);
        assert_eq!(snap.samples_aggregated, 3);
        assert_eq!(snap.ticks, 1);
        assert!((snap.drop_ratio() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_drop_ratio_empty() {
        assert_eq!(MetricsSnapshot::default().drop_ratio(), 0.0);
    }
}
