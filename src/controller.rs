// PoseSync - Multi-sensor orientation synchronization
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Connection state machine
//!
//! The [`ConnectionController`] drives the master device from discovery to
//! streaming:
//!
//! ```text
//! Idle -> Scanning -> MasterOpened -> Configuring -> AwaitingChildren -> Measuring
//!   \__________\____________\_____________\_______________\______> Failed
//! ```
//!
//! Each stage returns a [`Result`]; the first failure aborts setup. The
//! controller is the only owner of the master device handle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::connectivity::ConnectivityTracker;
use crate::control::{ControlFlags, StatusBoard};
use crate::error::{Result, SessionError};
use crate::filter::{IdentityFilter, SlotAssignment};
use crate::hardware::{DeviceHandle, HardwareProvider, PortInfo, SubscriptionId};
use crate::types::{ConnectionState, DeviceIdentity};

/// Pick the supported rate closest to `target`
///
/// Ties go to the rate listed first. Returns `None` when nothing is
/// supported.
pub fn select_update_rate(supported: &[u32], target: u32) -> Option<u32> {
    let mut best: Option<(u32, u32)> = None;
    for &rate in supported {
        let distance = rate.abs_diff(target);
        match best {
            Some((_, d)) if d <= distance => {}
            _ => best = Some((rate, distance)),
        }
    }
    best.map(|(rate, _)| rate)
}

/// How the wait for children ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwaitOutcome {
    /// Operator signalled ready
    Ready,
    /// Shutdown was requested while waiting
    ShutdownRequested,
}

/// Children resolved at enumeration, in slot order
pub struct EnumeratedChildren {
    /// Slot assignment for admitted identities
    pub slots: SlotAssignment,
    /// Device handles, index-aligned with `slots`
    pub handles: Vec<Box<dyn DeviceHandle>>,
}

impl std::fmt::Debug for EnumeratedChildren {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnumeratedChildren")
            .field("slots", &self.slots)
            .field("handles", &self.handles.len())
            .finish()
    }
}

/// Drives master discovery, configuration and the start of measurement
pub struct ConnectionController {
    provider: Box<dyn HardwareProvider>,
    master: Option<Box<dyn DeviceHandle>>,
    master_port: Option<PortInfo>,
    tracker: Arc<ConnectivityTracker>,
    tracker_subscription: Option<SubscriptionId>,
    status: Arc<StatusBoard>,
    selected_rate: Option<u32>,
    closed: bool,
}

impl ConnectionController {
    /// Create a controller over a hardware provider
    pub fn new(
        provider: Box<dyn HardwareProvider>,
        tracker: Arc<ConnectivityTracker>,
        status: Arc<StatusBoard>,
    ) -> Self {
        Self {
            provider,
            master: None,
            master_port: None,
            tracker,
            tracker_subscription: None,
            status,
            selected_rate: None,
            closed: false,
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.status.state()
    }

    /// Port the master was opened on
    pub fn master_port(&self) -> Option<&PortInfo> {
        self.master_port.as_ref()
    }

    /// Update rate chosen during configuration
    pub fn selected_rate(&self) -> Option<u32> {
        self.selected_rate
    }

    /// Connectivity tracker registered on the master
    pub fn tracker(&self) -> &Arc<ConnectivityTracker> {
        &self.tracker
    }

    fn enter(&self, next: ConnectionState) -> Result<()> {
        if self.status.advance(next) {
            Ok(())
        } else {
            Err(SessionError::Runtime(format!(
                "illegal transition {:?} -> {:?}",
                self.status.state(),
                next
            )))
        }
    }

    /// Find the first wireless master in scan order
    pub fn discover(&mut self) -> Result<PortInfo> {
        self.enter(ConnectionState::Scanning)?;
        info!("Scanning ports...");
        let ports = self.provider.scan_ports();
        let scanned = ports.len();
        let master = ports
            .into_iter()
            .find(|p| p.identity.is_master())
            .ok_or(SessionError::Discovery { scanned })?;
        info!("Found wireless master: {}", master);
        Ok(master)
    }

    /// Open the master's communication channel and resolve its handle
    pub fn open_master(&mut self, port: &PortInfo) -> Result<()> {
        self.provider
            .open_port(&port.port, port.baud_rate)
            .map_err(|e| SessionError::PortOpen {
                port: port.port.clone(),
                reason: e.to_string(),
            })?;

        let master = self
            .provider
            .resolve_device(&port.identity)
            .ok_or_else(|| SessionError::DeviceInstantiation(port.identity.to_string()))?;

        info!("Device connected @ {}", port.identity);
        self.master = Some(master);
        self.master_port = Some(port.clone());
        self.enter(ConnectionState::MasterOpened)
    }

    fn master_mut(&mut self) -> Result<&mut Box<dyn DeviceHandle>> {
        self.master
            .as_mut()
            .ok_or_else(|| SessionError::Runtime("master device is not open".into()))
    }

    /// Set the update rate and (re)start the radio on `channel`
    ///
    /// Returns the update rate actually selected.
    pub fn configure(&mut self, target_rate: u32, channel: u8) -> Result<u32> {
        self.enter(ConnectionState::Configuring)?;
        let tracker = Arc::clone(&self.tracker);
        let master = self.master_mut()?;
        master
            .goto_config()
            .map_err(|e| SessionError::Configuration(format!("failed to enter config mode: {}", e)))?;
        let subscription = master.subscribe(tracker);
        self.tracker_subscription = Some(subscription);

        let master = self.master_mut()?;
        let supported = master.supported_update_rates();
        let rate = select_update_rate(&supported, target_rate).ok_or_else(|| {
            SessionError::Configuration("device reports no supported update rates".into())
        })?;
        if rate != target_rate {
            info!("Update rate {} Hz not supported, using {} Hz", target_rate, rate);
        }
        master
            .set_update_rate(rate)
            .map_err(|e| SessionError::Configuration(format!("failed to set update rate: {}", e)))?;

        if master.is_radio_enabled() {
            master.disable_radio().map_err(|e| {
                SessionError::Configuration(format!("failed to disable radio: {}", e))
            })?;
        }
        master.enable_radio(channel).map_err(|e| {
            SessionError::Configuration(format!("failed to set radio channel {}: {}", channel, e))
        })?;

        self.selected_rate = Some(rate);
        info!("Configured: {} Hz on radio channel {}", rate, channel);
        Ok(rate)
    }

    /// Poll connectivity until the operator signals ready
    ///
    /// Without a `timeout` this waits as long as the operator does. A
    /// shutdown request ends the wait early.
    pub fn await_children(
        &mut self,
        flags: &ControlFlags,
        poll_interval: Duration,
        timeout: Option<Duration>,
    ) -> Result<AwaitOutcome> {
        self.enter(ConnectionState::AwaitingChildren)?;
        info!("Waiting for devices to wirelessly connect...");

        let started = Instant::now();
        let mut last_count = self.tracker.count();
        loop {
            std::thread::sleep(poll_interval);

            let count = self.tracker.count();
            if count != last_count {
                info!("Number of connected devices: {}", count);
                for device in self.tracker.snapshot() {
                    debug!("Device: {} connected", device);
                }
                last_count = count;
            }

            if flags.shutdown_requested() {
                return Ok(AwaitOutcome::ShutdownRequested);
            }
            if !flags.waiting_for_connections() {
                return Ok(AwaitOutcome::Ready);
            }
            if let Some(limit) = timeout {
                let waited = started.elapsed();
                if waited >= limit {
                    return Err(SessionError::AwaitTimeout {
                        waited_ms: waited.as_millis() as u64,
                    });
                }
            }
        }
    }

    /// Switch the master to streaming mode
    pub fn start_measurement(&mut self) -> Result<()> {
        info!("Starting measurement...");
        self.master_mut()?
            .goto_measurement()
            .map_err(|e| SessionError::MeasurementStart(e.to_string()))?;
        self.enter(ConnectionState::Measuring)
    }

    /// Resolve linked, allow-listed children and assign their slots
    pub fn enumerate_children(
        &mut self,
        filter: &IdentityFilter,
        max_segments: usize,
    ) -> Result<EnumeratedChildren> {
        let linked: Vec<DeviceIdentity> = self
            .provider
            .device_ids()
            .into_iter()
            .filter(|id| id.is_child() && self.tracker.contains(id))
            .collect();

        for id in linked.iter().filter(|id| !filter.admit(id)) {
            warn!("{} is not on the allow-list, ignoring", id);
        }

        let slots = filter.assign_slots(&linked, max_segments)?;
        let mut handles = Vec::with_capacity(slots.len());
        for (slot, identity) in slots.iter() {
            let handle = self
                .provider
                .resolve_device(identity)
                .ok_or_else(|| SessionError::DeviceInstantiation(identity.to_string()))?;
            debug!("Slot {} -> {}", slot, identity);
            handles.push(handle);
        }

        info!(
            "{} of {} linked devices assigned to segment slots",
            slots.len(),
            linked.len()
        );
        Ok(EnumeratedChildren { slots, handles })
    }

    /// Release the master and close the hardware channel
    ///
    /// Safe to call more than once; only the first call does anything.
    pub fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;

        if let (Some(master), Some(subscription)) =
            (self.master.as_mut(), self.tracker_subscription.take())
        {
            master.unsubscribe(subscription);
        }
        self.master = None;
        info!("Closing hardware connection...");
        self.provider.close();
        true
    }

    /// Whether [`close`](Self::close) has run
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl std::fmt::Debug for ConnectionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionController")
            .field("state", &self.state())
            .field("master_port", &self.master_port)
            .field("selected_rate", &self.selected_rate)
            .field("closed", &self.closed)
            .finish()
    }
}
