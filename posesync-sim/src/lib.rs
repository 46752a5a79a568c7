// PoseSync Sim - Simulated wireless sensor rig
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # PoseSync Sim
//!
//! Simulated wireless sensor rig for the PoseSync ecosystem.
//!
//! [`SimulatedHardware`] implements [`posesync::HardwareProvider`] with
//! one event thread per child sensor, so sessions run end to end without
//! a physical master:
//!
//! - **Staggered linking**: Children link one by one after the radio comes up
//! - **Random-walk motion**: Slow, seeded orientation drift per sensor
//! - **Failure injection**: Any setup stage can be made to fail
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use posesync::{Session, SessionConfig};
//! use posesync_sim::{SimConfig, SimulatedHardware};
//!
//! // Four known sensors and one stranger
//! let hardware = SimulatedHardware::new(SimConfig::rig(4, 1).with_seed(42));
//! let mut session = Session::new(Box::new(hardware), SessionConfig::default()).unwrap();
//! let handle = session.handle();
//!
//! std::thread::spawn(move || {
//!     std::thread::sleep(std::time::Duration::from_millis(500));
//!     handle.request_ready();
//!     std::thread::sleep(std::time::Duration::from_secs(1));
//!     handle.request_shutdown();
//! });
//!
//! let report = session.run().unwrap();
//! assert_eq!(report.slots.len(), 4);
//! ```

pub mod config;
pub mod error;
pub mod hardware;
pub mod motion;

// Re-exports for convenience
pub use config::{Fault, SimChild, SimConfig};
pub use error::{Result, SimError};
pub use hardware::{SimProbe, SimulatedHardware};
pub use motion::RandomWalk;
