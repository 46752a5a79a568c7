// PoseSync Exporter - Prometheus metrics definitions
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Prometheus metrics for PoseSync sessions.
//!
//! This module defines all Prometheus metrics exposed by the exporter
//! and provides functions to update them from session snapshots.

use lazy_static::lazy_static;
use posesync::{MetricsSnapshot, PoseSnapshot, SessionStatus};
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, CounterVec, Encoder, Gauge, GaugeVec,
    TextEncoder,
};

lazy_static! {
    // ============================================================
    // Session Counters (from MetricsSnapshot)
    // ============================================================

    /// Samples delivered by the hardware for tracked devices.
    pub static ref SAMPLES_RECEIVED_TOTAL: Gauge = register_gauge!(
        "posesync_samples_received_total",
        "Samples delivered by the hardware for tracked devices"
    ).unwrap();

    /// Samples discarded because a device queue was full.
    pub static ref SAMPLES_DROPPED_TOTAL: Gauge = register_gauge!(
        "posesync_samples_dropped_total",
        "Samples discarded on queue overflow"
    ).unwrap();

    /// Samples written into segment slots.
    pub static ref SAMPLES_AGGREGATED_TOTAL: Gauge = register_gauge!(
        "posesync_samples_aggregated_total",
        "Samples written into segment slots"
    ).unwrap();

    pub static ref TICKS_TOTAL: Gauge = register_gauge!(
        "posesync_ticks_total",
        "Aggregation sweeps performed"
    ).unwrap();

    pub static ref CONNECTIVITY_EVENTS_TOTAL: Gauge = register_gauge!(
        "posesync_connectivity_events_total",
        "Connectivity notifications observed"
    ).unwrap();

    pub static ref CALIBRATIONS_TOTAL: Gauge = register_gauge!(
        "posesync_calibrations_total",
        "Reference poses captured"
    ).unwrap();

    /// Fraction of received samples lost to overflow (0-1).
    pub static ref DROP_RATIO: Gauge = register_gauge!(
        "posesync_drop_ratio",
        "Fraction of received samples lost to queue overflow (0-1)"
    ).unwrap();

    // ============================================================
    // Session Status (from SessionStatus)
    // ============================================================

    /// Connection state code.
    /// Values: 0 = Idle, 1 = Scanning, 2 = MasterOpened, 3 = Configuring,
    /// 4 = AwaitingChildren, 5 = Measuring, 6 = ShuttingDown, 7 = Failed
    pub static ref CONNECTION_STATE: Gauge = register_gauge!(
        "posesync_connection_state",
        "Connection state (0=Idle .. 5=Measuring, 6=ShuttingDown, 7=Failed)"
    ).unwrap();

    pub static ref CONNECTED_DEVICES: Gauge = register_gauge!(
        "posesync_connected_devices",
        "Child devices currently linked to the master"
    ).unwrap();

    pub static ref RUNNING: Gauge = register_gauge!(
        "posesync_running",
        "Whether the aggregation loop is running (1=running)"
    ).unwrap();

    pub static ref SHUTDOWN_SUCCEEDED: Gauge = register_gauge!(
        "posesync_shutdown_succeeded",
        "Whether the session closed on request (1=yes)"
    ).unwrap();

    // ============================================================
    // Pose (from PoseSnapshot)
    // ============================================================

    pub static ref POSE_VERSION: Gauge = register_gauge!(
        "posesync_pose_version",
        "Number of sweeps that changed the pose"
    ).unwrap();

    pub static ref POPULATED_SEGMENTS: Gauge = register_gauge!(
        "posesync_populated_segments",
        "Segment slots holding at least one sample"
    ).unwrap();

    /// Calibrated orientation per slot (labeled by slot, device, component).
    pub static ref SEGMENT_ORIENTATION: GaugeVec = register_gauge_vec!(
        "posesync_segment_orientation",
        "Calibrated orientation quaternion component per segment",
        &["slot", "device", "component"]
    ).unwrap();

    // ============================================================
    // Exporter Metrics
    // ============================================================

    pub static ref CONTROL_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "posesync_exporter_control_requests_total",
        "Control requests received over HTTP",
        &["action"]
    ).unwrap();
}

/// Update session counters.
pub fn update_session_metrics(m: &MetricsSnapshot) {
    SAMPLES_RECEIVED_TOTAL.set(m.samples_received as f64);
    SAMPLES_DROPPED_TOTAL.set(m.samples_dropped as f64);
    SAMPLES_AGGREGATED_TOTAL.set(m.samples_aggregated as f64);
    TICKS_TOTAL.set(m.ticks as f64);
    CONNECTIVITY_EVENTS_TOTAL.set(m.connectivity_events as f64);
    CALIBRATIONS_TOTAL.set(m.calibrations as f64);
    DROP_RATIO.set(m.drop_ratio());
}

/// Update status gauges.
pub fn update_status_metrics(status: &SessionStatus) {
    CONNECTION_STATE.set(status.state.code() as f64);
    CONNECTED_DEVICES.set(status.connected_devices as f64);
    RUNNING.set(if status.running { 1.0 } else { 0.0 });
    SHUTDOWN_SUCCEEDED.set(if status.shutdown_succeeded { 1.0 } else { 0.0 });
}

/// Update pose gauges.
pub fn update_pose_metrics(pose: &PoseSnapshot) {
    POSE_VERSION.set(pose.version as f64);
    POPULATED_SEGMENTS.set(pose.populated() as f64);

    for slot in &pose.slots {
        let (Some(device), Some(q)) = (&slot.device, slot.calibrated()) else {
            continue;
        };
        let index = slot.index.to_string();
        for (component, value) in [("x", q.x), ("y", q.y), ("z", q.z), ("w", q.w)] {
            SEGMENT_ORIENTATION
                .with_label_values(&[&index, device.serial(), component])
                .set(value);
        }
    }
}

/// Count one control request.
pub fn record_control_request(action: &str) {
    CONTROL_REQUESTS_TOTAL.with_label_values(&[action]).inc();
}

/// Encode all metrics in Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use posesync::{ConnectionState, DeviceIdentity, OrientationSample, Quaternion, SegmentSlot};

    #[test]
    fn test_encode_metrics() {
        update_session_metrics(&MetricsSnapshot {
            samples_received: 10,
            samples_dropped: 1,
            ..Default::default()
        });
        update_status_metrics(&SessionStatus {
            state: ConnectionState::Measuring,
            running: true,
            new_data_available: false,
            connected_devices: 3,
            shutdown_succeeded: false,
        });

        let output = encode_metrics();
        assert!(output.contains("posesync_samples_received_total 10"));
        assert!(output.contains("posesync_drop_ratio 0.1"));
        assert!(output.contains("posesync_connection_state 5"));
        assert!(output.contains("posesync_connected_devices 3"));
    }

    #[test]
    fn test_pose_metrics_skip_empty_slots() {
        let device = DeviceIdentity::child("00B4391F");
        let pose = PoseSnapshot {
            version: 4,
            slots: vec![
                SegmentSlot {
                    index: 0,
                    device: Some(device.clone()),
                    sample: Some(OrientationSample::new(device, Quaternion::identity(), 0)),
                    reference: None,
                },
                SegmentSlot {
                    index: 1,
                    ..Default::default()
                },
            ],
        };
        update_pose_metrics(&pose);

        let output = encode_metrics();
        assert!(output.contains("posesync_pose_version 4"));
        assert!(output.contains(r#"component="w",device="00B4391F",slot="0""#));
        assert!(!output.contains(r#"slot="1""#));
    }

    #[test]
    fn test_control_counter() {
        record_control_request("ready");
        record_control_request("ready");
        assert!(CONTROL_REQUESTS_TOTAL.with_label_values(&["ready"]).get() >= 2.0);
    }
}
