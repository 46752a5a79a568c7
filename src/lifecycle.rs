// PoseSync - Multi-sensor orientation synchronization
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Ordered teardown of a session
//!
//! The [`LifecycleCoordinator`] owns every per-device listener
//! registration. It is the only place registrations are released, and it
//! releases each one exactly once, whether the session ends on request or
//! on a fatal error.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::control::{ControlFlags, StatusBoard};
use crate::controller::ConnectionController;
use crate::hardware::{DeviceHandle, DeviceListener, SubscriptionId};
use crate::queue::SampleQueue;
use crate::types::{ConnectionState, DeviceIdentity};

/// Why the session is being torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    /// Operator asked for shutdown
    Requested,
    /// A fatal error ended the session
    Failed,
}

/// A device handle with our queue subscribed to it
struct Registration {
    handle: Box<dyn DeviceHandle>,
    subscription: SubscriptionId,
    queue: Arc<SampleQueue>,
}

/// Owns listener registrations and performs teardown once
pub struct LifecycleCoordinator {
    flags: Arc<ControlFlags>,
    status: Arc<StatusBoard>,
    registrations: Vec<Registration>,
    torn_down: bool,
}

impl LifecycleCoordinator {
    /// Create a coordinator with no registrations
    pub fn new(flags: Arc<ControlFlags>, status: Arc<StatusBoard>) -> Self {
        Self {
            flags,
            status,
            registrations: Vec::new(),
            torn_down: false,
        }
    }

    /// Subscribe `queue` to `handle`'s data events and take ownership of both
    pub fn register(&mut self, mut handle: Box<dyn DeviceHandle>, queue: Arc<SampleQueue>) {
        let listener: Arc<dyn DeviceListener> = queue.clone();
        let subscription = handle.subscribe(listener);
        debug!("Registered listener for {}", handle.identity());
        self.registrations.push(Registration {
            handle,
            subscription,
            queue,
        });
    }

    /// Identities with a live registration, in registration order
    pub fn registered(&self) -> Vec<DeviceIdentity> {
        self.registrations
            .iter()
            .map(|r| r.queue.device().clone())
            .collect()
    }

    /// Number of live registrations
    pub fn registration_count(&self) -> usize {
        self.registrations.len()
    }

    /// Check for a shutdown request at a tick boundary
    ///
    /// Returns true the first time a request is seen; after teardown it
    /// always returns false.
    pub fn observe_shutdown(&self) -> bool {
        !self.torn_down && self.flags.shutdown_requested()
    }

    /// Whether teardown has already run
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Release registrations and queues, then close the master
    ///
    /// Runs at most once; later calls return false and do nothing.
    pub fn teardown(&mut self, controller: &mut ConnectionController, reason: TeardownReason) -> bool {
        if self.torn_down {
            return false;
        }
        self.torn_down = true;

        let terminal = match reason {
            TeardownReason::Requested => ConnectionState::ShuttingDown,
            TeardownReason::Failed => ConnectionState::Failed,
        };
        self.status.advance(terminal);
        self.status.set_running(false);

        for mut registration in self.registrations.drain(..) {
            let device = registration.queue.device().clone();
            release_step(&format!("unsubscribe {}", device), || {
                registration.handle.unsubscribe(registration.subscription)
            });
            registration.queue.close();
        }

        release_step("close hardware", || {
            controller.close();
        });
        controller.tracker().clear();

        let ok = reason == TeardownReason::Requested;
        self.status.set_shutdown_succeeded(ok);
        if ok {
            info!("Successful exit.");
        }
        true
    }
}

/// Run one hardware release call; a panic is logged and does not stop
/// the remaining steps.
fn release_step<F: FnOnce()>(step: &str, f: F) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        warn!("Teardown step '{}' panicked; continuing", step);
    }
}

impl std::fmt::Debug for LifecycleCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleCoordinator")
            .field("registrations", &self.registrations.len())
            .field("torn_down", &self.torn_down)
            .finish()
    }
}
