// PoseSync - Multi-sensor orientation synchronization
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Aggregation of per-device queues into the pose
//!
//! Each sweep pops at most one sample from every managed queue and writes
//! it into the device's segment slot. Slots keep only the last sample;
//! nothing is interpolated. Between sweeps the aggregator sleeps on the
//! shared [`DataSignal`] for at most one tick interval.

use std::sync::Arc;
use std::time::Duration;

use log::info;

use crate::config::{CalibrationMode, SessionConfig};
use crate::control::{ControlFlags, StatusBoard};
use crate::metrics::SessionMetrics;
use crate::pose::{PoseReader, SharedPose};
use crate::queue::{DataSignal, SampleQueue};

/// A queue and the slot its samples land in
#[derive(Debug)]
struct Route {
    slot: usize,
    queue: Arc<SampleQueue>,
}

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Slots overwritten in this sweep
    pub updated: usize,
    /// Whether a reference pose was captured
    pub calibrated: bool,
}

/// Drains sample queues into segment slots
#[derive(Debug)]
pub struct PoseAggregator {
    routes: Vec<Route>,
    pose: Arc<SharedPose>,
    flags: Arc<ControlFlags>,
    status: Arc<StatusBoard>,
    metrics: Arc<SessionMetrics>,
    signal: Arc<DataSignal>,
    calibration_mode: CalibrationMode,
    tick_interval: Duration,
}

impl PoseAggregator {
    /// Create an aggregator writing into `pose`
    pub fn new(
        pose: Arc<SharedPose>,
        flags: Arc<ControlFlags>,
        status: Arc<StatusBoard>,
        metrics: Arc<SessionMetrics>,
        signal: Arc<DataSignal>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            routes: Vec::new(),
            pose,
            flags,
            status,
            metrics,
            signal,
            calibration_mode: config.calibration_mode,
            tick_interval: config.tick_interval,
        }
    }

    /// Manage `queue`, writing its samples into `slot`
    pub fn add_route(&mut self, slot: usize, queue: Arc<SampleQueue>) {
        self.routes.push(Route { slot, queue });
    }

    /// Number of managed queues
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Read-only view of the pose this aggregator writes
    pub fn reader(&self) -> PoseReader {
        PoseReader::new(Arc::clone(&self.pose))
    }

    /// Perform one sweep over every queue
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        for route in &self.routes {
            if let Some(sample) = route.queue.try_pop() {
                self.pose.write(route.slot, sample);
                report.updated += 1;
            }
        }

        if report.updated > 0 {
            self.status.mark_new_data();
            self.metrics.record_aggregated(report.updated as u64);
        }

        report.calibrated = self.maybe_calibrate(report.updated > 0);
        if report.updated > 0 || report.calibrated {
            self.pose.bump_version();
        }
        self.metrics.record_tick();
        report
    }

    /// Capture the reference pose if one is pending and every slot has data
    fn maybe_calibrate(&self, had_updates: bool) -> bool {
        if !self.flags.calibration_requested() || !self.pose.assigned_slots_populated() {
            return false;
        }
        match self.calibration_mode {
            CalibrationMode::ConsumeOnce => {
                let captured = self.pose.capture_reference();
                self.flags.clear_calibration();
                info!("Reference pose captured for {} segments", captured);
            }
            // Re-capturing without new data would change nothing.
            CalibrationMode::Sticky if !had_updates => return false,
            CalibrationMode::Sticky => {
                self.pose.capture_reference();
            }
        }
        self.metrics.record_calibration();
        true
    }

    /// Sleep until data arrives or one tick interval passes
    pub fn wait_for_data(&self) -> bool {
        self.signal.wait_timeout(self.tick_interval)
    }

    /// Sweep continuously until `should_stop` returns true
    ///
    /// `should_stop` is consulted once per sweep, before the sweep runs.
    /// Returns the number of sweeps performed.
    pub fn run<F>(&mut self, mut should_stop: F) -> u64
    where
        F: FnMut() -> bool,
    {
        self.status.set_running(true);
        info!("Aggregating {} devices", self.routes.len());

        let mut sweeps = 0u64;
        while self.status.is_running() {
            if should_stop() {
                break;
            }
            let report = self.tick();
            sweeps += 1;
            if report.updated == 0 {
                self.wait_for_data();
            }
        }
        sweeps
    }
}
