// PoseSync - Multi-sensor orientation synchronization
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Allow-list filtering and segment slot assignment
//!
//! Only allow-listed serials get a queue, a listener registration and a
//! slot. Slots are handed out in enumeration order: the k-th admitted
//! identity gets slot k. The mapping therefore depends on the order the
//! hardware enumerates devices, not on the serial itself, and may differ
//! between sessions if the hardware reorders its device list.

use std::collections::HashSet;

use serde::Serialize;

use crate::error::{Result, SessionError};
use crate::types::{normalize_serial, DeviceIdentity};

/// Default number of segment slots
pub const DEFAULT_MAX_SEGMENTS: usize = 10;

/// Static allow-list of device serials
#[derive(Debug, Clone, Default)]
pub struct IdentityFilter {
    allowed: HashSet<String>,
}

impl IdentityFilter {
    /// Create a filter admitting the given serials
    pub fn new<I, S>(serials: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed: serials
                .into_iter()
                .map(|s| normalize_serial(s.as_ref()))
                .collect(),
        }
    }

    /// Whether `identity` is on the allow-list
    pub fn admit(&self, identity: &DeviceIdentity) -> bool {
        self.allowed.contains(identity.serial())
    }

    /// Number of permitted serials
    pub fn len(&self) -> usize {
        self.allowed.len()
    }

    /// Check if nothing is permitted
    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }

    /// Assign slots to admitted child devices in enumeration order
    ///
    /// Non-child identities and identities off the allow-list are skipped.
    /// Duplicate identities keep their first slot. More than `max_segments`
    /// admitted devices is a configuration error.
    pub fn assign_slots(
        &self,
        enumerated: &[DeviceIdentity],
        max_segments: usize,
    ) -> Result<SlotAssignment> {
        let mut slots: Vec<DeviceIdentity> = Vec::new();
        for identity in enumerated {
            if !identity.is_child() || !self.admit(identity) || slots.contains(identity) {
                continue;
            }
            slots.push(identity.clone());
        }

        if slots.len() > max_segments {
            return Err(SessionError::TooManySegments {
                found: slots.len(),
                max: max_segments,
            });
        }

        Ok(SlotAssignment { slots })
    }
}

/// Fixed mapping from segment slot to device identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SlotAssignment {
    slots: Vec<DeviceIdentity>,
}

impl SlotAssignment {
    /// Slot index assigned to `identity`
    pub fn slot_of(&self, identity: &DeviceIdentity) -> Option<usize> {
        self.slots.iter().position(|d| d == identity)
    }

    /// Identity assigned to `slot`
    pub fn device_at(&self, slot: usize) -> Option<&DeviceIdentity> {
        self.slots.get(slot)
    }

    /// Iterate `(slot, identity)` pairs in slot order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &DeviceIdentity)> {
        self.slots.iter().enumerate()
    }

    /// Number of assigned slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check if no slot was assigned
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
