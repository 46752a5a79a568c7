// PoseSync - Multi-sensor orientation synchronization
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Error types for PoseSync
//!
//! Every setup stage maps its hardware failure into one [`SessionError`]
//! variant. All of them are fatal to the current session: nothing is
//! retried, and the session tears down before the error reaches the caller.

use thiserror::Error;

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

/// A failure reported by the hardware layer
///
/// The hardware layer only tells us "ok" or "fail"; the message is whatever
/// context the provider could attach.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HardwareFault(pub String);

impl HardwareFault {
    /// Create a fault with a message
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Main error type for a sensor session
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// No wireless master found during the port scan
    #[error("No wireless masters found ({scanned} ports scanned)")]
    Discovery { scanned: usize },

    /// Master communication channel could not be opened
    #[error("Failed to open port {port}: {reason}")]
    PortOpen { port: String, reason: String },

    /// Update rate or radio setup failed
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// More admitted devices than segment slots
    #[error("Configuration error: {found} admitted devices exceed {max} segment slots")]
    TooManySegments { found: usize, max: usize },

    /// A linked identity resolved to no device handle
    #[error("Failed to create a device instance for {0}")]
    DeviceInstantiation(String),

    /// Master refused to enter measurement mode
    #[error("Failed to go to measurement mode: {0}")]
    MeasurementStart(String),

    /// Gave up waiting for children to link
    #[error("Timed out after {waited_ms}ms waiting for devices to connect")]
    AwaitTimeout { waited_ms: u64 },

    /// Invalid session configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be read or parsed
    #[error("Config file error: {0}")]
    ConfigFile(String),

    /// Fault raised while the aggregation loop was running
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl SessionError {
    /// Whether this error was raised before measurement started
    pub fn is_setup_error(&self) -> bool {
        !matches!(self, Self::Runtime(_))
    }
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        Self::ConfigFile(err.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        Self::ConfigFile(err.to_string())
    }
}
