// PoseSync Sim - Simulated wireless sensor rig
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Error types for the simulator

use thiserror::Error;

/// Simulator setup errors
#[derive(Error, Debug)]
pub enum SimError {
    /// Rig description is inconsistent
    #[error("Invalid rig: {0}")]
    InvalidRig(String),

    /// Rig file could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Rig file is not valid JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for simulator operations
pub type Result<T> = std::result::Result<T, SimError>;
