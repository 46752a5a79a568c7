// PoseSync - Multi-sensor orientation synchronization
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Segment slots and the live pose
//!
//! [`SharedPose`] is written only by the aggregator. Consumers get a
//! [`PoseReader`], which copies slots out one at a time: a snapshot may
//! mix slots from two consecutive sweeps. Readers that need a consistent
//! pose should compare [`PoseSnapshot::version`] across reads.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::types::{DeviceIdentity, OrientationSample, Quaternion};

/// The latest orientation of one tracked body segment
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SegmentSlot {
    /// Slot index in the pose
    pub index: usize,
    /// Device assigned at enumeration time
    pub device: Option<DeviceIdentity>,
    /// Most recently aggregated sample
    pub sample: Option<OrientationSample>,
    /// Reference orientation captured at calibration
    pub reference: Option<Quaternion>,
}

impl SegmentSlot {
    fn empty(index: usize) -> Self {
        Self {
            index,
            ..Default::default()
        }
    }

    /// Raw orientation of the latest sample
    pub fn orientation(&self) -> Option<Quaternion> {
        self.sample.as_ref().map(|s| s.orientation)
    }

    /// Orientation relative to the captured reference
    ///
    /// Without a reference this is the raw orientation.
    pub fn calibrated(&self) -> Option<Quaternion> {
        let current = self.orientation()?;
        Some(match &self.reference {
            Some(reference) => current.relative_to(reference),
            None => current,
        })
    }

    /// Whether a device is assigned to this slot
    pub fn is_assigned(&self) -> bool {
        self.device.is_some()
    }
}

/// Copy of the pose at (roughly) one instant
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoseSnapshot {
    /// Pose version when the copy started
    pub version: u64,
    /// All slots, in slot order
    pub slots: Vec<SegmentSlot>,
}

impl PoseSnapshot {
    /// Raw orientation per slot
    pub fn orientations(&self) -> Vec<Option<Quaternion>> {
        self.slots.iter().map(SegmentSlot::orientation).collect()
    }

    /// Calibrated orientation per slot
    pub fn calibrated(&self) -> Vec<Option<Quaternion>> {
        self.slots.iter().map(SegmentSlot::calibrated).collect()
    }

    /// Slot by index
    pub fn slot(&self, index: usize) -> Option<&SegmentSlot> {
        self.slots.get(index)
    }

    /// Number of slots holding a sample
    pub fn populated(&self) -> usize {
        self.slots.iter().filter(|s| s.sample.is_some()).count()
    }
}

/// Fixed-size array of segment slots shared with readers
#[derive(Debug)]
pub struct SharedPose {
    slots: Vec<Mutex<SegmentSlot>>,
    version: AtomicU64,
}

impl SharedPose {
    /// Allocate `size` empty slots
    pub fn new(size: usize) -> Self {
        Self {
            slots: (0..size).map(|i| Mutex::new(SegmentSlot::empty(i))).collect(),
            version: AtomicU64::new(0),
        }
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check if the pose has no slots
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Bind `device` to `index`; a slot is bound at most once
    pub(crate) fn assign(&self, index: usize, device: DeviceIdentity) -> bool {
        match self.slots.get(index) {
            Some(slot) => {
                let mut slot = slot.lock().unwrap();
                if slot.device.is_some() {
                    return false;
                }
                slot.device = Some(device);
                true
            }
            None => false,
        }
    }

    /// Overwrite the sample held in `index`
    pub(crate) fn write(&self, index: usize, sample: OrientationSample) {
        if let Some(slot) = self.slots.get(index) {
            slot.lock().unwrap().sample = Some(sample);
        }
    }

    /// Whether at least one slot is assigned and every assigned slot
    /// holds a sample
    pub(crate) fn assigned_slots_populated(&self) -> bool {
        let mut assigned = 0;
        for slot in &self.slots {
            let slot = slot.lock().unwrap();
            if slot.device.is_some() {
                if slot.sample.is_none() {
                    return false;
                }
                assigned += 1;
            }
        }
        assigned > 0
    }

    /// Store each slot's current orientation as its reference
    ///
    /// Returns the number of references captured.
    pub(crate) fn capture_reference(&self) -> usize {
        let mut captured = 0;
        for slot in &self.slots {
            let mut slot = slot.lock().unwrap();
            if let Some(current) = slot.orientation() {
                slot.reference = Some(current.normalized());
                captured += 1;
            }
        }
        captured
    }

    pub(crate) fn bump_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Number of sweeps that changed the pose
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Copy every slot, one lock at a time
    pub fn snapshot(&self) -> PoseSnapshot {
        PoseSnapshot {
            version: self.version(),
            slots: self
                .slots
                .iter()
                .map(|slot| slot.lock().unwrap().clone())
                .collect(),
        }
    }
}

/// Read-only view of a [`SharedPose`]
#[derive(Debug, Clone)]
pub struct PoseReader {
    pose: Arc<SharedPose>,
}

impl PoseReader {
    /// Wrap a shared pose
    pub fn new(pose: Arc<SharedPose>) -> Self {
        Self { pose }
    }

    /// Copy of the current pose
    pub fn snapshot(&self) -> PoseSnapshot {
        self.pose.snapshot()
    }

    /// Copy of a single slot
    pub fn slot(&self, index: usize) -> Option<SegmentSlot> {
        self.pose
            .slots
            .get(index)
            .map(|slot| slot.lock().unwrap().clone())
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.pose.len()
    }

    /// Check if the pose has no slots
    pub fn is_empty(&self) -> bool {
        self.pose.is_empty()
    }

    /// Number of sweeps that changed the pose
    pub fn version(&self) -> u64 {
        self.pose.version()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample(dev: &str, q: Quaternion, seq: u64) -> OrientationSample {
        OrientationSample::new(DeviceIdentity::child(dev), q, seq)
    }

    #[test]
    fn test_new_pose_empty_slots() {
        let pose = SharedPose::new(10);
        let snap = pose.snapshot();
        assert_eq!(snap.slots.len(), 10);
        assert_eq!(snap.populated(), 0);
        assert_eq!(snap.slots[7].index, 7);
    }

    #[test]
    fn test_assign_once() {
        let pose = SharedPose::new(2);
        assert!(pose.assign(0, DeviceIdentity::child("A")));
        assert!(!pose.assign(0, DeviceIdentity::child("B")));
        assert!(!pose.assign(5, DeviceIdentity::child("C")));
        assert_eq!(
            pose.snapshot().slots[0].device,
            Some(DeviceIdentity::child("A"))
        );
    }

    #[test]
    fn test_write_last_sample_wins() {
        let pose = SharedPose::new(2);
        pose.write(1, sample("A", Quaternion::new(0.0, 0.0, 0.0, 1.0), 0));
        pose.write(1, sample("A", Quaternion::new(1.0, 0.0, 0.0, 0.0), 1));
        let slot = pose.snapshot().slots[1].clone();
        assert_eq!(slot.sample.unwrap().sequence, 1);
    }

    #[test]
    fn test_calibrated_relative_to_reference() {
        let pose = SharedPose::new(1);
        let ninety_z = Quaternion::new(0.0, 0.0, 0.7071067811865476, 0.7071067811865476);
        pose.write(0, sample("A", ninety_z, 0));
        assert_eq!(pose.capture_reference(), 1);

        let snap = pose.snapshot();
        let calibrated = snap.calibrated()[0].unwrap();
        assert_relative_eq!(calibrated.w.abs(), 1.0, epsilon = 1e-9);

        pose.write(0, sample("A", Quaternion::identity(), 1));
        let calibrated = pose.snapshot().calibrated()[0].unwrap();
        assert_relative_eq!(calibrated.angle_to(&ninety_z.conjugate()), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_calibrated_without_reference_is_raw() {
        let pose = SharedPose::new(1);
        let q = Quaternion::new(0.5, 0.5, 0.5, 0.5);
        pose.write(0, sample("A", q, 0));
        assert_eq!(pose.snapshot().calibrated()[0], Some(q));
    }

    #[test]
    fn test_assigned_slots_populated() {
        let pose = SharedPose::new(3);
        assert!(!pose.assigned_slots_populated());
        pose.assign(0, DeviceIdentity::child("A"));
        pose.assign(1, DeviceIdentity::child("B"));
        assert!(!pose.assigned_slots_populated());
        pose.write(0, sample("A", Quaternion::identity(), 0));
        assert!(!pose.assigned_slots_populated());
        pose.write(1, sample("B", Quaternion::identity(), 0));
        assert!(pose.assigned_slots_populated());
    }

    #[test]
    fn test_reader_sees_writes() {
        let pose = Arc::new(SharedPose::new(2));
        let reader = PoseReader::new(Arc::clone(&pose));
        pose.write(0, sample("A", Quaternion::identity(), 3));
        pose.bump_version();
        assert_eq!(reader.version(), 1);
        assert_eq!(reader.slot(0).unwrap().sample.unwrap().sequence, 3);
        assert!(reader.slot(2).is_none());
        assert_eq!(reader.len(), 2);
    }

    #[test]
    fn test_snapshot_serializes() {
        let pose = SharedPose::new(1);
        pose.assign(0, DeviceIdentity::child("A"));
        pose.write(0, sample("A", Quaternion::identity(), 0));
        let json = serde_json::to_string(&pose.snapshot()).unwrap();
        assert!(json.contains("\"version\":0"));
        assert!(json.contains("\"serial\":\"A\""));
    }
}
