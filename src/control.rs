// PoseSync - Multi-sensor orientation synchronization
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! External control inputs and published status flags
//!
//! Control inputs are plain shared flags: last write wins, nothing is
//! queued, and the session polls them at stage or tick boundaries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use log::{info, warn};

use crate::types::ConnectionState;

/// Operator-driven flags read cooperatively by the session
#[derive(Debug)]
pub struct ControlFlags {
    wait_for_connections: AtomicBool,
    calibration: AtomicBool,
    shutdown: AtomicBool,
}

impl ControlFlags {
    /// Create flags in their start-of-session state
    ///
    /// The session waits for connections until told otherwise.
    pub fn new(calibrate_on_start: bool) -> Self {
        Self {
            wait_for_connections: AtomicBool::new(true),
            calibration: AtomicBool::new(calibrate_on_start),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Stop waiting for children and start measuring
    pub fn request_ready(&self) {
        self.wait_for_connections.store(false, Ordering::SeqCst);
    }

    /// Set the wait-for-connections toggle directly
    pub fn set_wait_for_connections(&self, wait: bool) {
        self.wait_for_connections.store(wait, Ordering::SeqCst);
    }

    /// Whether the session should keep waiting for children
    pub fn waiting_for_connections(&self) -> bool {
        self.wait_for_connections.load(Ordering::SeqCst)
    }

    /// Ask for a reference pose on the next full sweep
    pub fn request_calibration(&self) {
        self.calibration.store(true, Ordering::SeqCst);
    }

    /// Whether a calibration is pending
    pub fn calibration_requested(&self) -> bool {
        self.calibration.load(Ordering::SeqCst)
    }

    /// Clear a pending calibration
    pub fn clear_calibration(&self) {
        self.calibration.store(false, Ordering::SeqCst);
    }

    /// Ask the session to shut down at the next tick boundary
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Whether shutdown was requested
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

impl Default for ControlFlags {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Status flags written by the session and read by consumers
#[derive(Debug, Default)]
pub struct StatusBoard {
    state: Mutex<ConnectionState>,
    running: AtomicBool,
    new_data: AtomicBool,
    shutdown_succeeded: AtomicBool,
}

impl StatusBoard {
    /// Create a board in the `Idle` state
    pub fn new() -> Self {
        Self::default()
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `next` if the transition is legal
    ///
    /// Returns false and leaves the state untouched otherwise.
    pub fn advance(&self, next: ConnectionState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == next {
            return true;
        }
        if !state.can_transition_to(next) {
            warn!("Ignoring transition {:?} -> {:?}", *state, next);
            return false;
        }
        info!("State: {:?} -> {:?}", *state, next);
        *state = next;
        true
    }

    /// Whether the aggregation loop is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// Whether samples arrived since the consumer last acknowledged
    pub fn new_data_available(&self) -> bool {
        self.new_data.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_new_data(&self) {
        self.new_data.store(true, Ordering::SeqCst);
    }

    /// Read and clear the new-data indicator
    pub fn take_new_data(&self) -> bool {
        self.new_data.swap(false, Ordering::SeqCst)
    }

    /// Whether the session closed cleanly
    pub fn shutdown_succeeded(&self) -> bool {
        self.shutdown_succeeded.load(Ordering::SeqCst)
    }

    pub(crate) fn set_shutdown_succeeded(&self, ok: bool) {
        self.shutdown_succeeded.store(ok, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_flags_initial() {
        let flags = ControlFlags::new(true);
        assert!(flags.waiting_for_connections());
        assert!(flags.calibration_requested());
        assert!(!flags.shutdown_requested());

        let flags = ControlFlags::new(false);
        assert!(!flags.calibration_requested());
    }

    #[test]
    fn test_control_flags_last_write_wins() {
        let flags = ControlFlags::default();
        flags.request_ready();
        flags.set_wait_for_connections(true);
        assert!(flags.waiting_for_connections());
        flags.request_calibration();
        flags.clear_calibration();
        assert!(!flags.calibration_requested());
        flags.request_shutdown();
        flags.request_shutdown();
        assert!(flags.shutdown_requested());
    }

    #[test]
    fn test_status_advance() {
        let status = StatusBoard::new();
        assert_eq!(status.state(), ConnectionState::Idle);
        assert!(status.advance(ConnectionState::Scanning));
        assert!(!status.advance(ConnectionState::Measuring));
        assert_eq!(status.state(), ConnectionState::Scanning);
        assert!(status.advance(ConnectionState::Scanning));
        assert!(status.advance(ConnectionState::Failed));
        assert!(!status.advance(ConnectionState::Measuring));
        assert_eq!(status.state(), ConnectionState::Failed);
    }

    #[test]
    fn test_new_data_take() {
        let status = StatusBoard::new();
        assert!(!status.take_new_data());
        status.mark_new_data();
        assert!(status.new_data_available());
        assert!(status.take_new_data());
        assert!(!status.new_data_available());
    }
}
