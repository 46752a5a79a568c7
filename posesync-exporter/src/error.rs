// PoseSync Exporter - Error types
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Startup errors for the exporter.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExporterError {
    /// Session configuration was rejected.
    #[error("Session setup failed: {0}")]
    Session(#[from] posesync::SessionError),

    /// Simulated rig description was rejected.
    #[error("Simulator setup failed: {0}")]
    Sim(#[from] posesync_sim::SimError),

    /// Listener could not be bound or the server failed.
    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ExporterError>;
