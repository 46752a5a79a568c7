// PoseSync - Multi-sensor orientation synchronization
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! High-level session API
//!
//! A [`Session`] owns one run of the pipeline: discover the master, open
//! and configure it, wait for the operator, start measuring, bind children
//! to segment slots and aggregate until shutdown. Any failure tears the
//! session down before the error is returned.
//!
//! # Example
//!
//! ```rust,ignore
//! use posesync::{Session, SessionConfig};
//!
//! let mut session = Session::new(provider, SessionConfig::default())?;
//! let handle = session.handle();
//!
//! std::thread::spawn(move || {
//!     handle.request_ready();
//!     // ... read handle.pose() ...
//!     handle.request_shutdown();
//! });
//!
//! let report = session.run()?;
//! assert!(report.shutdown_succeeded);
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use log::{error, info};
use serde::Serialize;

use crate::aggregator::PoseAggregator;
use crate::config::SessionConfig;
use crate::connectivity::ConnectivityTracker;
use crate::control::{ControlFlags, StatusBoard};
use crate::controller::{AwaitOutcome, ConnectionController};
use crate::error::{Result, SessionError};
use crate::filter::{IdentityFilter, SlotAssignment};
use crate::hardware::HardwareProvider;
use crate::lifecycle::{LifecycleCoordinator, TeardownReason};
use crate::metrics::{MetricsSnapshot, SessionMetrics};
use crate::pose::{PoseReader, PoseSnapshot, SharedPose};
use crate::queue::{DataSignal, SampleQueue};
use crate::types::ConnectionState;

/// Published view of a session for status endpoints
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub state: ConnectionState,
    pub running: bool,
    pub new_data_available: bool,
    pub connected_devices: usize,
    pub shutdown_succeeded: bool,
}

/// Summary returned once a session has ended
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    /// Terminal connection state
    pub state: ConnectionState,
    /// Whether the session closed on request
    pub shutdown_succeeded: bool,
    /// Children bound to segment slots (empty if measurement never began)
    pub slots: SlotAssignment,
    /// Update rate applied to the master
    pub selected_rate: Option<u32>,
    /// Counters at the end of the run
    pub metrics: MetricsSnapshot,
}

/// Cloneable remote control for a running session
///
/// Every method is safe to call from any thread, before, during or after
/// [`Session::run`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    flags: Arc<ControlFlags>,
    status: Arc<StatusBoard>,
    tracker: Arc<ConnectivityTracker>,
    metrics: Arc<SessionMetrics>,
    pose: PoseReader,
}

impl SessionHandle {
    /// Stop waiting for children and start measuring
    pub fn request_ready(&self) {
        self.flags.request_ready();
    }

    /// Capture a reference pose on the next full sweep
    pub fn request_calibration(&self) {
        self.flags.request_calibration();
    }

    /// End the session at the next tick boundary
    pub fn request_shutdown(&self) {
        self.flags.request_shutdown();
    }

    pub fn state(&self) -> ConnectionState {
        self.status.state()
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    pub fn shutdown_succeeded(&self) -> bool {
        self.status.shutdown_succeeded()
    }

    /// Whether samples arrived since the last [`take_new_data`](Self::take_new_data)
    pub fn new_data_available(&self) -> bool {
        self.status.new_data_available()
    }

    /// Read and clear the new-data indicator
    pub fn take_new_data(&self) -> bool {
        self.status.take_new_data()
    }

    /// Current status flags
    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.status.state(),
            running: self.status.is_running(),
            new_data_available: self.status.new_data_available(),
            connected_devices: self.tracker.count(),
            shutdown_succeeded: self.status.shutdown_succeeded(),
        }
    }

    /// Copy of the live pose
    pub fn pose(&self) -> PoseSnapshot {
        self.pose.snapshot()
    }

    /// Session counters
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

/// One run of the synchronization pipeline
pub struct Session {
    config: SessionConfig,
    filter: IdentityFilter,
    controller: Option<ConnectionController>,
    flags: Arc<ControlFlags>,
    status: Arc<StatusBoard>,
    tracker: Arc<ConnectivityTracker>,
    metrics: Arc<SessionMetrics>,
    pose: Arc<SharedPose>,
}

impl Session {
    /// Create a session over `provider`
    ///
    /// Fails if `config` does not validate. No hardware is touched until
    /// [`run`](Self::run).
    pub fn new(provider: Box<dyn HardwareProvider>, config: SessionConfig) -> Result<Self> {
        config.validate()?;

        let flags = Arc::new(ControlFlags::new(config.calibrate_on_start));
        let status = Arc::new(StatusBoard::new());
        let metrics = Arc::new(SessionMetrics::new());
        let tracker = Arc::new(ConnectivityTracker::with_metrics(Arc::clone(&metrics)));
        let controller =
            ConnectionController::new(provider, Arc::clone(&tracker), Arc::clone(&status));

        Ok(Self {
            filter: IdentityFilter::new(&config.allow_list),
            pose: Arc::new(SharedPose::new(config.max_segments)),
            controller: Some(controller),
            config,
            flags,
            status,
            tracker,
            metrics,
        })
    }

    /// Remote control for this session
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            flags: Arc::clone(&self.flags),
            status: Arc::clone(&self.status),
            tracker: Arc::clone(&self.tracker),
            metrics: Arc::clone(&self.metrics),
            pose: PoseReader::new(Arc::clone(&self.pose)),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Run the pipeline to completion on the calling thread
    ///
    /// Blocks until shutdown is requested or a stage fails. In both cases
    /// every registration is released and the hardware channel is closed
    /// before this returns. A session runs once; later calls fail.
    pub fn run(&mut self) -> Result<SessionReport> {
        let mut controller = self
            .controller
            .take()
            .ok_or_else(|| SessionError::Runtime("session has already run".into()))?;
        let mut lifecycle =
            LifecycleCoordinator::new(Arc::clone(&self.flags), Arc::clone(&self.status));

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.drive(&mut controller, &mut lifecycle)
        }))
        .unwrap_or_else(|panic| Err(SessionError::Runtime(panic_message(&*panic))));

        match outcome {
            Ok(slots) => {
                lifecycle.teardown(&mut controller, TeardownReason::Requested);
                Ok(self.report(&controller, slots))
            }
            Err(e) => {
                error!("{}", e);
                lifecycle.teardown(&mut controller, TeardownReason::Failed);
                Err(e)
            }
        }
    }

    /// Setup followed by the aggregation loop
    fn drive(
        &self,
        controller: &mut ConnectionController,
        lifecycle: &mut LifecycleCoordinator,
    ) -> Result<SlotAssignment> {
        let port = controller.discover()?;
        controller.open_master(&port)?;
        controller.configure(self.config.target_update_rate, self.config.radio_channel)?;

        let outcome = controller.await_children(
            &self.flags,
            self.config.poll_interval,
            self.config.await_children_timeout,
        )?;
        if outcome == AwaitOutcome::ShutdownRequested {
            info!("Shutdown requested before measurement started");
            return Ok(SlotAssignment::default());
        }

        controller.start_measurement()?;
        let children = controller.enumerate_children(&self.filter, self.config.max_segments)?;

        let signal = Arc::new(DataSignal::new());
        let mut aggregator = PoseAggregator::new(
            Arc::clone(&self.pose),
            Arc::clone(&self.flags),
            Arc::clone(&self.status),
            Arc::clone(&self.metrics),
            Arc::clone(&signal),
            &self.config,
        );

        for ((slot, identity), handle) in children.slots.iter().zip(children.handles) {
            self.pose.assign(slot, identity.clone());
            let queue = Arc::new(
                SampleQueue::new(identity.clone(), self.config.queue_capacity)
                    .with_signal(Arc::clone(&signal))
                    .with_metrics(Arc::clone(&self.metrics)),
            );
            lifecycle.register(handle, Arc::clone(&queue));
            aggregator.add_route(slot, queue);
        }

        let sweeps = aggregator.run(|| lifecycle.observe_shutdown());
        info!("Aggregation stopped after {} sweeps", sweeps);
        Ok(children.slots)
    }

    fn report(&self, controller: &ConnectionController, slots: SlotAssignment) -> SessionReport {
        SessionReport {
            state: self.status.state(),
            shutdown_succeeded: self.status.shutdown_succeeded(),
            slots,
            selected_rate: controller.selected_rate(),
            metrics: self.metrics.snapshot(),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("state", &self.status.state())
            .field("has_run", &self.controller.is_none())
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("session panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("session panicked: {}", s)
    } else {
        "session panicked".to_string()
    }
}
