// PoseSync - Multi-sensor orientation synchronization
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Core data types: device identities, connection states and orientation samples

use std::fmt;

use nalgebra::{Quaternion as NaQuaternion, UnitQuaternion};
use serde::{Deserialize, Serialize};

/// Role a device plays on the radio link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeviceKind {
    /// Radio hub bridging to child sensors
    WirelessMaster,
    /// Wireless inertial measurement unit
    Child,
    /// Anything else found on a port
    Other,
}

/// Opaque device identity (hardware serial)
///
/// Serials are normalised to upper case so `00b4391f` and `00B4391F`
/// name the same device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceIdentity {
    serial: String,
    kind: DeviceKind,
}

impl DeviceIdentity {
    /// Create an identity with the given role
    pub fn new(serial: impl AsRef<str>, kind: DeviceKind) -> Self {
        Self {
            serial: normalize_serial(serial.as_ref()),
            kind,
        }
    }

    /// Create a wireless master identity
    pub fn master(serial: impl AsRef<str>) -> Self {
        Self::new(serial, DeviceKind::WirelessMaster)
    }

    /// Create a child sensor identity
    pub fn child(serial: impl AsRef<str>) -> Self {
        Self::new(serial, DeviceKind::Child)
    }

    /// Device serial (upper case)
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Device role
    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// True for radio hubs
    pub fn is_master(&self) -> bool {
        self.kind == DeviceKind::WirelessMaster
    }

    /// True for child sensors
    pub fn is_child(&self) -> bool {
        self.kind == DeviceKind::Child
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID: {}", self.serial)
    }
}

/// Upper-case and trim a serial string
pub fn normalize_serial(serial: &str) -> String {
    serial.trim().to_ascii_uppercase()
}

/// Link state reported by the hardware for a child device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectivityState {
    /// Disconnected, limited informational functionality only
    Disconnected,
    /// Rejected by the master and disconnected
    Rejected,
    /// Connected through a cable
    PluggedIn,
    /// Connected wirelessly
    Wireless,
    /// Reading from a file
    File,
    /// Unknown state
    Unknown,
}

impl ConnectivityState {
    /// Only a wireless link counts as linked
    pub fn is_linked(&self) -> bool {
        matches!(self, Self::Wireless)
    }
}

/// Session connection state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Idle,
    Scanning,
    MasterOpened,
    Configuring,
    AwaitingChildren,
    Measuring,
    ShuttingDown,
    Failed,
}

impl ConnectionState {
    /// Whether `next` is a legal successor of this state
    ///
    /// Any state may fail or shut down; otherwise setup only moves forward.
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (ShuttingDown, Idle) | (Failed, Idle) => true,
            (ShuttingDown, _) | (Failed, _) => false,
            (_, ShuttingDown) | (_, Failed) => true,
            (Idle, Scanning)
            | (Scanning, MasterOpened)
            | (MasterOpened, Configuring)
            | (Configuring, AwaitingChildren)
            | (AwaitingChildren, Measuring) => true,
            _ => false,
        }
    }

    /// Terminal states end the session
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ShuttingDown | Self::Failed)
    }

    /// Numeric code, stable for metrics export
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

/// Orientation quaternion as reported by the sensor firmware
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Quaternion {
    /// Create a quaternion from components
    pub const fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w }
    }

    /// The identity rotation
    pub const fn identity() -> Self {
        Self::new(0.0, 0.0, 0.0, 1.0)
    }

    /// Euclidean norm
    pub fn norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w).sqrt()
    }

    /// Inverse rotation (assumes unit length)
    pub fn conjugate(&self) -> Self {
        Self::new(-self.x, -self.y, -self.z, self.w)
    }

    /// Unit-length copy; degenerate input maps to identity
    pub fn normalized(&self) -> Self {
        let n = self.norm();
        if n < f64::EPSILON || !n.is_finite() {
            return Self::identity();
        }
        Self::new(self.x / n, self.y / n, self.z / n, self.w / n)
    }

    /// Rotation of `self` relative to `reference`: `conj(reference) * self`
    pub fn relative_to(&self, reference: &Quaternion) -> Self {
        let r = reference.to_unit();
        let q = self.to_unit();
        Self::from(r.inverse() * q)
    }

    /// Angle in radians between two rotations
    pub fn angle_to(&self, other: &Quaternion) -> f64 {
        self.to_unit().angle_to(&other.to_unit())
    }

    fn to_unit(self) -> UnitQuaternion<f64> {
        let n = self.normalized();
        UnitQuaternion::new_normalize(NaQuaternion::new(n.w, n.x, n.y, n.z))
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

impl From<UnitQuaternion<f64>> for Quaternion {
    fn from(q: UnitQuaternion<f64>) -> Self {
        Self::new(q.i, q.j, q.k, q.w)
    }
}

impl From<[f64; 4]> for Quaternion {
    fn from(v: [f64; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

/// One orientation reading from a child sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrientationSample {
    /// Orientation at the instant of measurement
    pub orientation: Quaternion,
    /// Device that produced the sample
    pub device: DeviceIdentity,
    /// Arrival order within the device's queue
    pub sequence: u64,
}

impl OrientationSample {
    /// Create a sample
    pub fn new(device: DeviceIdentity, orientation: Quaternion, sequence: u64) -> Self {
        Self {
            orientation,
            device,
            sequence,
        }
    }
}
