// PoseSync - Multi-sensor orientation synchronization
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Hardware capability interface
//!
//! The radio discovery and pairing protocol is not implemented here. A
//! vendor SDK binding (or the simulator in `posesync-sim`) provides these
//! traits, and delivers events to [`DeviceListener`] values on its own
//! threads: at-least-once, in order per device, with no ordering across
//! devices.

use std::fmt;
use std::sync::Arc;

use crate::error::HardwareFault;
use crate::types::{ConnectivityState, DeviceIdentity, Quaternion};

/// Result of a single hardware call
pub type HwResult<T = ()> = std::result::Result<T, HardwareFault>;

/// A device found during a port scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name (e.g. `/dev/ttyUSB0`, `COM3`)
    pub port: String,
    /// Baud rate the device answered on
    pub baud_rate: u32,
    /// Identity of the device behind the port
    pub identity: DeviceIdentity,
}

impl PortInfo {
    /// Create a port description
    pub fn new(port: impl Into<String>, baud_rate: u32, identity: DeviceIdentity) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            identity,
        }
    }
}

impl fmt::Display for PortInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Port: {} @ {:>7} Bd, {}",
            self.port, self.baud_rate, self.identity
        )
    }
}

/// Handle returned by [`DeviceHandle::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Receiver for asynchronous hardware events
///
/// Both methods default to no-ops so a listener only implements the events
/// it cares about. Implementations must not block: they run on threads
/// owned by the hardware layer.
pub trait DeviceListener: Send + Sync {
    /// A child device changed link state
    fn on_connectivity_changed(&self, _device: &DeviceIdentity, _state: ConnectivityState) {}

    /// A child device produced an orientation reading
    fn on_data_available(&self, _device: &DeviceIdentity, _orientation: Quaternion) {}
}

/// Operations on one opened device (master or child)
pub trait DeviceHandle: Send {
    /// Identity of this device
    fn identity(&self) -> DeviceIdentity;

    /// Enter configuration mode
    fn goto_config(&mut self) -> HwResult;

    /// Enter measurement (streaming) mode
    fn goto_measurement(&mut self) -> HwResult;

    /// Update rates the device supports, in device-reported order
    fn supported_update_rates(&self) -> Vec<u32>;

    /// Set the update rate in Hz
    fn set_update_rate(&mut self, rate: u32) -> HwResult;

    /// Whether the radio is currently on
    fn is_radio_enabled(&self) -> bool;

    /// Turn the radio on at `channel`
    fn enable_radio(&mut self, channel: u8) -> HwResult;

    /// Turn the radio off
    fn disable_radio(&mut self) -> HwResult;

    /// Register a listener for this device's events
    fn subscribe(&mut self, listener: Arc<dyn DeviceListener>) -> SubscriptionId;

    /// Remove a previously registered listener
    fn unsubscribe(&mut self, id: SubscriptionId);
}

/// Entry point to the hardware layer
pub trait HardwareProvider: Send {
    /// List devices attached to local ports, in scan order
    fn scan_ports(&mut self) -> Vec<PortInfo>;

    /// Open the communication channel on a port
    fn open_port(&mut self, port: &str, baud_rate: u32) -> HwResult;

    /// Identities of every device known through the opened port
    fn device_ids(&self) -> Vec<DeviceIdentity>;

    /// Obtain a handle for a known identity
    fn resolve_device(&mut self, identity: &DeviceIdentity) -> Option<Box<dyn DeviceHandle>>;

    /// Close the communication channel and release all devices
    fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener(AtomicUsize);

    impl DeviceListener for CountingListener {
        fn on_data_available(&self, _device: &DeviceIdentity, _orientation: Quaternion) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_listener_defaults_are_noops() {
        let listener = CountingListener(AtomicUsize::new(0));
        let dev = DeviceIdentity::child("00B4391F");
        listener.on_connectivity_changed(&dev, ConnectivityState::Wireless);
        listener.on_data_available(&dev, Quaternion::identity());
        assert_eq!(listener.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_port_info_display() {
        let info = PortInfo::new("COM3", 2_000_000, DeviceIdentity::master("00b00001"));
        let s = info.to_string();
        assert!(s.contains("COM3"));
        assert!(s.contains("00B00001"));
    }
}
