// PoseSync - Multi-sensor orientation synchronization
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Scripted in-memory hardware for integration tests
//!
//! The test drives every event by hand through [`Rig`]; nothing happens on
//! a background thread unless the test spawns one.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use posesync::{
    ConnectivityState, DeviceHandle, DeviceIdentity, DeviceListener, HardwareFault,
    HardwareProvider, HwResult, PortInfo, Quaternion, SessionConfig, SubscriptionId,
};

pub const MASTER: &str = "00B00001";

/// What the scripted hardware does at each step
#[derive(Debug, Clone)]
pub struct Script {
    pub ports: Vec<PortInfo>,
    pub known_devices: Vec<DeviceIdentity>,
    pub unresolvable: Vec<String>,
    pub supported_rates: Vec<u32>,
    pub radio_initially_enabled: bool,
    pub fail_open: bool,
    pub fail_goto_config: bool,
    pub fail_set_rate: bool,
    pub fail_enable_radio: bool,
    pub fail_measurement: bool,
    /// Serial whose `subscribe` panics
    pub panic_on_subscribe: Option<String>,
}

impl Script {
    /// One master on the first port, plus the given children behind it
    pub fn with_children(children: &[&str]) -> Self {
        Self {
            ports: vec![PortInfo::new(
                "/dev/ttyUSB0",
                921_600,
                DeviceIdentity::master(MASTER),
            )],
            known_devices: children.iter().map(DeviceIdentity::child).collect(),
            unresolvable: Vec::new(),
            supported_rates: vec![50, 60, 75],
            radio_initially_enabled: false,
            fail_open: false,
            fail_goto_config: false,
            fail_set_rate: false,
            fail_enable_radio: false,
            fail_measurement: false,
            panic_on_subscribe: None,
        }
    }
}

/// Everything the hardware was asked to do
#[derive(Default)]
pub struct Hub {
    subscriptions: Vec<(String, SubscriptionId, Arc<dyn DeviceListener>)>,
    next_subscription: u64,
    pub opened: Vec<(String, u32)>,
    pub applied_rate: Option<u32>,
    pub radio_channel: Option<u8>,
    pub radio_disabled: usize,
    pub measuring: bool,
    pub close_calls: usize,
}

impl Hub {
    fn listeners_for(&self, serial: &str) -> Vec<Arc<dyn DeviceListener>> {
        self.subscriptions
            .iter()
            .filter(|(s, _, _)| s == serial)
            .map(|(_, _, l)| Arc::clone(l))
            .collect()
    }
}

/// Test-side view of the scripted hardware
#[derive(Clone)]
pub struct Rig {
    hub: Arc<Mutex<Hub>>,
}

impl Rig {
    pub fn new() -> Self {
        Self {
            hub: Arc::new(Mutex::new(Hub::default())),
        }
    }

    /// Hardware provider backed by this rig
    pub fn provider(&self, script: Script) -> Box<dyn HardwareProvider> {
        Box::new(MockProvider {
            script,
            hub: Arc::clone(&self.hub),
        })
    }

    pub fn hub(&self) -> std::sync::MutexGuard<'_, Hub> {
        self.hub.lock().unwrap()
    }

    /// Report a link state change for `serial` through the master
    pub fn set_link(&self, serial: &str, state: ConnectivityState) {
        let listeners = self.hub().listeners_for(MASTER);
        let device = DeviceIdentity::child(serial);
        for listener in listeners {
            listener.on_connectivity_changed(&device, state);
        }
    }

    pub fn link(&self, serial: &str) {
        self.set_link(serial, ConnectivityState::Wireless);
    }

    /// Deliver one reading from `serial` to its subscribers
    pub fn emit(&self, serial: &str, orientation: Quaternion) {
        let listeners = self.hub().listeners_for(serial);
        let device = DeviceIdentity::child(serial);
        for listener in listeners {
            listener.on_data_available(&device, orientation);
        }
    }

    /// Live subscriptions on `serial`
    pub fn subscribers(&self, serial: &str) -> usize {
        self.hub().listeners_for(serial).len()
    }

    /// Live subscriptions on any device
    pub fn total_subscribers(&self) -> usize {
        self.hub().subscriptions.len()
    }
}

struct MockProvider {
    script: Script,
    hub: Arc<Mutex<Hub>>,
}

impl HardwareProvider for MockProvider {
    fn scan_ports(&mut self) -> Vec<PortInfo> {
        self.script.ports.clone()
    }

    fn open_port(&mut self, port: &str, baud_rate: u32) -> HwResult {
        if self.script.fail_open {
            return Err(HardwareFault::new("port busy"));
        }
        self.hub
            .lock()
            .unwrap()
            .opened
            .push((port.to_string(), baud_rate));
        Ok(())
    }

    fn device_ids(&self) -> Vec<DeviceIdentity> {
        let mut ids = vec![DeviceIdentity::master(MASTER)];
        ids.extend(self.script.known_devices.iter().cloned());
        ids
    }

    fn resolve_device(&mut self, identity: &DeviceIdentity) -> Option<Box<dyn DeviceHandle>> {
        if self
            .script
            .unresolvable
            .iter()
            .any(|s| s == identity.serial())
        {
            return None;
        }
        Some(Box::new(MockDevice {
            identity: identity.clone(),
            script: self.script.clone(),
            hub: Arc::clone(&self.hub),
            radio_enabled: self.script.radio_initially_enabled,
        }))
    }

    fn close(&mut self) {
        self.hub.lock().unwrap().close_calls += 1;
    }
}

struct MockDevice {
    identity: DeviceIdentity,
    script: Script,
    hub: Arc<Mutex<Hub>>,
    radio_enabled: bool,
}

impl DeviceHandle for MockDevice {
    fn identity(&self) -> DeviceIdentity {
        self.identity.clone()
    }

    fn goto_config(&mut self) -> HwResult {
        if self.script.fail_goto_config {
            return Err(HardwareFault::new("no response"));
        }
        self.hub.lock().unwrap().measuring = false;
        Ok(())
    }

    fn goto_measurement(&mut self) -> HwResult {
        if self.script.fail_measurement {
            return Err(HardwareFault::new("no response"));
        }
        self.hub.lock().unwrap().measuring = true;
        Ok(())
    }

    fn supported_update_rates(&self) -> Vec<u32> {
        self.script.supported_rates.clone()
    }

    fn set_update_rate(&mut self, rate: u32) -> HwResult {
        if self.script.fail_set_rate {
            return Err(HardwareFault::new("rejected"));
        }
        self.hub.lock().unwrap().applied_rate = Some(rate);
        Ok(())
    }

    fn is_radio_enabled(&self) -> bool {
        self.radio_enabled
    }

    fn enable_radio(&mut self, channel: u8) -> HwResult {
        if self.script.fail_enable_radio {
            return Err(HardwareFault::new("channel unavailable"));
        }
        self.radio_enabled = true;
        self.hub.lock().unwrap().radio_channel = Some(channel);
        Ok(())
    }

    fn disable_radio(&mut self) -> HwResult {
        self.radio_enabled = false;
        self.hub.lock().unwrap().radio_disabled += 1;
        Ok(())
    }

    fn subscribe(&mut self, listener: Arc<dyn DeviceListener>) -> SubscriptionId {
        if self.script.panic_on_subscribe.as_deref() == Some(self.identity.serial()) {
            panic!("listener table corrupted for {}", self.identity.serial());
        }
        let mut hub = self.hub.lock().unwrap();
        hub.next_subscription += 1;
        let id = SubscriptionId(hub.next_subscription);
        hub.subscriptions
            .push((self.identity.serial().to_string(), id, listener));
        id
    }

    fn unsubscribe(&mut self, id: SubscriptionId) {
        self.hub
            .lock()
            .unwrap()
            .subscriptions
            .retain(|(_, s, _)| *s != id);
    }
}

/// Fast-polling configuration admitting `serials`
pub fn fast_config(serials: &[&str]) -> SessionConfig {
    SessionConfig::with_allow_list(serials.iter().copied())
        .with_poll_interval(Duration::from_millis(5))
        .with_tick_interval(Duration::from_millis(1))
}

/// Poll `condition` until it holds or five seconds pass
pub fn wait_until<F: FnMut() -> bool>(mut condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}
