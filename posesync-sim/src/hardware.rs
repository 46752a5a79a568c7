// PoseSync Sim - Simulated wireless sensor rig
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Threaded hardware provider.
//!
//! Opening the port starts one thread per child. Each thread waits for
//! the master's radio, links after its configured delay, and streams
//! random-walk orientations at the master's update rate while the master
//! is measuring. Events for one child are always delivered in order from
//! that child's thread; events from different children interleave freely.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info};
use posesync::{
    ConnectivityState, DeviceHandle, DeviceIdentity, DeviceListener, HardwareFault,
    HardwareProvider, HwResult, PortInfo, SubscriptionId,
};

use crate::config::{Fault, SimConfig};
use crate::motion::RandomWalk;

/// Longest single sleep in a device thread, so `close` is never slow.
const MAX_NAP: Duration = Duration::from_millis(5);

struct Subscription {
    serial: String,
    id: SubscriptionId,
    listener: Arc<dyn DeviceListener>,
}

/// State shared between the provider, its handles and device threads.
struct Rig {
    config: SimConfig,
    subscriptions: Mutex<Vec<Subscription>>,
    next_subscription: AtomicU64,
    measuring: AtomicBool,
    update_rate: AtomicU32,
    radio_channel: Mutex<Option<u8>>,
    radio_epoch: AtomicU64,
    linked: HashMap<String, AtomicBool>,
    forced_offline: HashMap<String, AtomicBool>,
    delivered: AtomicU64,
    stop: AtomicBool,
}

impl Rig {
    fn new(config: SimConfig) -> Self {
        let flags = |serials: &[String]| {
            serials
                .iter()
                .map(|s| (s.clone(), AtomicBool::new(false)))
                .collect::<HashMap<_, _>>()
        };
        let serials = config.child_serials();
        let radio = config.radio_initially_enabled.then_some(0);
        Self {
            linked: flags(&serials),
            forced_offline: flags(&serials),
            update_rate: AtomicU32::new(config.supported_rates.first().copied().unwrap_or(60)),
            config,
            subscriptions: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            measuring: AtomicBool::new(false),
            radio_channel: Mutex::new(radio),
            radio_epoch: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            stop: AtomicBool::new(false),
        }
    }

    fn master(&self) -> DeviceIdentity {
        DeviceIdentity::master(&self.config.master_serial)
    }

    fn listeners(&self, serial: &str) -> Vec<Arc<dyn DeviceListener>> {
        self.subscriptions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.serial == serial)
            .map(|s| Arc::clone(&s.listener))
            .collect()
    }

    fn radio_on(&self) -> bool {
        self.radio_channel.lock().unwrap().is_some()
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Sleep up to `duration`, waking early on stop.
    fn nap(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        loop {
            let now = Instant::now();
            if self.stopped() || now >= deadline {
                return;
            }
            thread::sleep((deadline - now).min(MAX_NAP));
        }
    }

    fn set_link(&self, serial: &str, state: ConnectivityState) {
        if let Some(flag) = self.linked.get(serial) {
            let linked = state.is_linked();
            if flag.swap(linked, Ordering::AcqRel) == linked {
                return;
            }
        }
        let child = DeviceIdentity::child(serial);
        debug!("sim: {} {:?}", child, state);
        for listener in self.listeners(&self.config.master_serial) {
            listener.on_connectivity_changed(&child, state);
        }
    }

    fn is_linked(&self, serial: &str) -> bool {
        self.linked
            .get(serial)
            .map(|f| f.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    fn is_forced_offline(&self, serial: &str) -> bool {
        self.forced_offline
            .get(serial)
            .map(|f| f.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    fn run_child(&self, serial: &str, link_delay: Duration, seed: Option<u64>) {
        let child = DeviceIdentity::child(serial);
        let mut walk = RandomWalk::new(self.config.step_std, seed);
        // Radio epoch this child last saw come up, and when.
        let mut radio_up: Option<(u64, Instant)> = None;

        while !self.stopped() {
            if !self.radio_on() {
                radio_up = None;
                self.set_link(serial, ConnectivityState::Disconnected);
                self.nap(MAX_NAP);
                continue;
            }

            let epoch = self.radio_epoch.load(Ordering::Acquire);
            let since = match radio_up {
                Some((seen, since)) if seen == epoch => since,
                previous => {
                    // Radio restarted while we were napping.
                    if previous.is_some() {
                        self.set_link(serial, ConnectivityState::Disconnected);
                    }
                    let now = Instant::now();
                    radio_up = Some((epoch, now));
                    now
                }
            };

            if self.is_forced_offline(serial) {
                self.set_link(serial, ConnectivityState::Disconnected);
                self.nap(MAX_NAP);
                continue;
            }
            if !self.is_linked(serial) {
                if since.elapsed() < link_delay {
                    self.nap(MAX_NAP);
                    continue;
                }
                self.set_link(serial, ConnectivityState::Wireless);
            }

            if !self.measuring.load(Ordering::Acquire) {
                self.nap(MAX_NAP);
                continue;
            }

            let orientation = walk.next_orientation();
            for listener in self.listeners(serial) {
                listener.on_data_available(&child, orientation);
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            let rate = self.update_rate.load(Ordering::Acquire).max(1);
            self.nap(Duration::from_secs_f64(1.0 / rate as f64));
        }
    }
}

/// Simulated wireless rig implementing [`HardwareProvider`].
pub struct SimulatedHardware {
    rig: Arc<Rig>,
    threads: Vec<JoinHandle<()>>,
    opened: bool,
}

impl SimulatedHardware {
    /// Create a rig; no threads run until the port is opened.
    pub fn new(config: SimConfig) -> Self {
        Self {
            rig: Arc::new(Rig::new(config)),
            threads: Vec::new(),
            opened: false,
        }
    }

    /// Observer and fault injector for this rig.
    pub fn probe(&self) -> SimProbe {
        SimProbe {
            rig: Arc::clone(&self.rig),
        }
    }

    fn start_threads(&mut self) {
        for (i, child) in self.rig.config.children.iter().enumerate() {
            let rig = Arc::clone(&self.rig);
            let serial = child.serial.clone();
            let delay = Duration::from_millis(child.link_delay_ms);
            let seed = self.rig.config.seed.map(|s| s.wrapping_add(i as u64));
            self.threads
                .push(thread::spawn(move || rig.run_child(&serial, delay, seed)));
        }
    }

    fn stop_threads(&mut self) {
        self.rig.stop.store(true, Ordering::Release);
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

impl HardwareProvider for SimulatedHardware {
    fn scan_ports(&mut self) -> Vec<PortInfo> {
        if self.rig.config.fails(&Fault::EmptyScan) {
            return Vec::new();
        }
        vec![PortInfo::new(
            self.rig.config.port.clone(),
            self.rig.config.baud_rate,
            self.rig.master(),
        )]
    }

    fn open_port(&mut self, port: &str, baud_rate: u32) -> HwResult {
        if self.rig.config.fails(&Fault::OpenPort) || port != self.rig.config.port {
            return Err(HardwareFault::new(format!("cannot open {}", port)));
        }
        if !self.opened {
            self.opened = true;
            info!("sim: opened {} @ {} baud", port, baud_rate);
            self.start_threads();
        }
        Ok(())
    }

    fn device_ids(&self) -> Vec<DeviceIdentity> {
        let mut ids = vec![self.rig.master()];
        ids.extend(self.rig.config.children.iter().map(|c| DeviceIdentity::child(&c.serial)));
        ids
    }

    fn resolve_device(&mut self, identity: &DeviceIdentity) -> Option<Box<dyn DeviceHandle>> {
        let serial = identity.serial().to_string();
        if self.rig.config.fails(&Fault::Unresolvable {
            serial: serial.clone(),
        }) {
            return None;
        }
        let known = serial == self.rig.config.master_serial || self.rig.linked.contains_key(&serial);
        known.then(|| {
            Box::new(SimDevice {
                identity: identity.clone(),
                rig: Arc::clone(&self.rig),
            }) as Box<dyn DeviceHandle>
        })
    }

    fn close(&mut self) {
        self.stop_threads();
        self.rig.measuring.store(false, Ordering::Release);
        info!("sim: closed");
    }
}

impl Drop for SimulatedHardware {
    fn drop(&mut self) {
        self.stop_threads();
    }
}

impl std::fmt::Debug for SimulatedHardware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedHardware")
            .field("port", &self.rig.config.port)
            .field("children", &self.rig.config.children.len())
            .field("threads", &self.threads.len())
            .finish()
    }
}

/// Handle to one simulated device.
struct SimDevice {
    identity: DeviceIdentity,
    rig: Arc<Rig>,
}

impl SimDevice {
    fn check(&self, fault: Fault, what: &str) -> HwResult {
        if self.rig.config.fails(&fault) {
            Err(HardwareFault::new(format!("{} refused {}", self.identity, what)))
        } else {
            Ok(())
        }
    }
}

impl DeviceHandle for SimDevice {
    fn identity(&self) -> DeviceIdentity {
        self.identity.clone()
    }

    fn goto_config(&mut self) -> HwResult {
        self.check(Fault::GotoConfig, "config mode")?;
        self.rig.measuring.store(false, Ordering::Release);
        Ok(())
    }

    fn goto_measurement(&mut self) -> HwResult {
        self.check(Fault::GotoMeasurement, "measurement mode")?;
        self.rig.measuring.store(true, Ordering::Release);
        Ok(())
    }

    fn supported_update_rates(&self) -> Vec<u32> {
        self.rig.config.supported_rates.clone()
    }

    fn set_update_rate(&mut self, rate: u32) -> HwResult {
        self.check(Fault::SetUpdateRate, "update rate")?;
        if !self.rig.config.supported_rates.contains(&rate) {
            return Err(HardwareFault::new(format!("{} Hz not supported", rate)));
        }
        self.rig.update_rate.store(rate, Ordering::Release);
        Ok(())
    }

    fn is_radio_enabled(&self) -> bool {
        self.rig.radio_on()
    }

    fn enable_radio(&mut self, channel: u8) -> HwResult {
        self.check(Fault::EnableRadio, "radio channel")?;
        let mut radio = self.rig.radio_channel.lock().unwrap();
        if radio.is_some() {
            return Err(HardwareFault::new("radio already enabled"));
        }
        *radio = Some(channel);
        self.rig.radio_epoch.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn disable_radio(&mut self) -> HwResult {
        *self.rig.radio_channel.lock().unwrap() = None;
        Ok(())
    }

    fn subscribe(&mut self, listener: Arc<dyn DeviceListener>) -> SubscriptionId {
        let id = SubscriptionId(self.rig.next_subscription.fetch_add(1, Ordering::AcqRel));
        self.rig.subscriptions.lock().unwrap().push(Subscription {
            serial: self.identity.serial().to_string(),
            id,
            listener,
        });
        id
    }

    fn unsubscribe(&mut self, id: SubscriptionId) {
        self.rig.subscriptions.lock().unwrap().retain(|s| s.id != id);
    }
}

/// Read-only view of a rig, plus link fault injection.
#[derive(Clone)]
pub struct SimProbe {
    rig: Arc<Rig>,
}

impl SimProbe {
    /// Live subscriptions on `serial`.
    pub fn subscribers(&self, serial: &str) -> usize {
        self.rig.listeners(serial).len()
    }

    /// Live subscriptions on every device.
    pub fn total_subscribers(&self) -> usize {
        self.rig.subscriptions.lock().unwrap().len()
    }

    /// Whether the master is streaming.
    pub fn is_measuring(&self) -> bool {
        self.rig.measuring.load(Ordering::Acquire)
    }

    /// Update rate currently applied.
    pub fn update_rate(&self) -> u32 {
        self.rig.update_rate.load(Ordering::Acquire)
    }

    /// Radio channel, if the radio is on.
    pub fn radio_channel(&self) -> Option<u8> {
        *self.rig.radio_channel.lock().unwrap()
    }

    /// Whether `serial` is currently linked.
    pub fn is_linked(&self, serial: &str) -> bool {
        self.rig.is_linked(serial)
    }

    /// Number of data events delivered to listeners.
    pub fn delivered(&self) -> u64 {
        self.rig.delivered.load(Ordering::Relaxed)
    }

    /// Whether device threads have been told to stop.
    pub fn is_closed(&self) -> bool {
        self.rig.stopped()
    }

    /// Drop `serial`'s link until [`restore`](Self::restore) is called.
    pub fn drop_link(&self, serial: &str) {
        if let Some(flag) = self.rig.forced_offline.get(serial) {
            flag.store(true, Ordering::Release);
        }
    }

    /// Let `serial` link again.
    pub fn restore(&self, serial: &str) {
        if let Some(flag) = self.rig.forced_offline.get(serial) {
            flag.store(false, Ordering::Release);
        }
    }
}

impl std::fmt::Debug for SimProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimProbe")
            .field("measuring", &self.is_measuring())
            .field("radio_channel", &self.radio_channel())
            .field("subscribers", &self.total_subscribers())
            .finish()
    }
}
