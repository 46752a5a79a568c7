// PoseSync - Multi-sensor orientation synchronization
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # PoseSync - Multi-sensor orientation synchronization
//!
//! Collects orientation quaternions from a set of wireless inertial
//! sensors, linked through one wireless master, into a single pose of up
//! to ten body segments.
//!
//! ## Key Features
//!
//! - **Lossy per-device buffering**: Bounded queues drop the oldest sample
//! - **Allow-listed slots**: Only known sensors are bound to segments
//! - **Closest-rate configuration**: The master runs at the supported rate nearest the target
//! - **Clean teardown**: Every listener is released exactly once, on success or failure
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use posesync::{Session, SessionConfig};
//!
//! let config = SessionConfig::with_allow_list(["00B4391F", "00B43808"]);
//! let mut session = Session::new(provider, config)?;
//! let handle = session.handle();
//!
//! // From a UI or control thread:
//! handle.request_ready();
//! let pose = handle.pose();
//! handle.request_shutdown();
//!
//! // On the session thread:
//! let report = session.run()?;
//! ```
//!
//! ## Modules
//!
//! - [`hardware`]: Traits the vendor SDK binding implements
//! - [`connectivity`]: Set of wirelessly linked devices
//! - [`queue`]: Bounded per-device sample queues
//! - [`filter`]: Allow-list and slot assignment
//! - [`controller`]: Master discovery and configuration
//! - [`aggregator`]: Queue draining into the pose
//! - [`lifecycle`]: Ordered teardown
//! - [`session`]: The whole pipeline behind one call

// Modules
pub mod aggregator;
pub mod config;
pub mod connectivity;
pub mod control;
pub mod controller;
pub mod error;
pub mod filter;
pub mod hardware;
pub mod lifecycle;
pub mod metrics;
pub mod pose;
pub mod queue;
pub mod session;
pub mod types;

// Re-exports for convenient access
pub use aggregator::{PoseAggregator, TickReport};
pub use config::{CalibrationMode, SessionConfig, DEFAULT_ALLOW_LIST};
pub use connectivity::ConnectivityTracker;
pub use control::{ControlFlags, StatusBoard};
pub use controller::{select_update_rate, AwaitOutcome, ConnectionController, EnumeratedChildren};
pub use error::{HardwareFault, Result, SessionError};
pub use filter::{IdentityFilter, SlotAssignment, DEFAULT_MAX_SEGMENTS};
pub use hardware::{DeviceHandle, DeviceListener, HardwareProvider, HwResult, PortInfo, SubscriptionId};
pub use lifecycle::{LifecycleCoordinator, TeardownReason};
pub use metrics::{MetricsSnapshot, SessionMetrics};
pub use pose::{PoseReader, PoseSnapshot, SegmentSlot, SharedPose};
pub use queue::{DataSignal, SampleQueue, DEFAULT_QUEUE_CAPACITY};
pub use session::{Session, SessionHandle, SessionReport, SessionStatus};
pub use types::{
    ConnectionState, ConnectivityState, DeviceIdentity, DeviceKind, OrientationSample, Quaternion,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default target update rate in Hz
pub const DEFAULT_UPDATE_RATE: u32 = 60;

/// Default radio channel for the wireless master
pub const DEFAULT_RADIO_CHANNEL: u8 = 19;
