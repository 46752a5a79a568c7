// PoseSync - Multi-sensor orientation synchronization
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Configuration types for a sensor session
//!
//! The device allow-list and radio parameters are static startup
//! configuration. They can be built in code or loaded from a JSON file
//! (durations are given in milliseconds):
//!
//! ```json
//! {
//!   "target_update_rate": 60,
//!   "radio_channel": 19,
//!   "allow_list": ["00B4391F", "00B43808"],
//!   "await_children_timeout_ms": 30000
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

/// Lowest radio channel the master accepts
pub const MIN_RADIO_CHANNEL: u8 = 11;

/// Highest radio channel the master accepts
pub const MAX_RADIO_CHANNEL: u8 = 25;

/// Sensors fitted to the reference capture rig
pub const DEFAULT_ALLOW_LIST: [&str; 12] = [
    "00B4391F", "00B43808", "00B438C7", "00B438AE", "00B43923", "00B43926", "00B427A3", "00B42780",
    "00B4278B", "00B42790", "00B42799", "00B4279F",
];

/// How a calibration trigger is consumed by the aggregator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationMode {
    /// Capture one reference sweep, then clear the trigger
    #[default]
    ConsumeOnce,
    /// Re-capture on every sweep until the operator clears the trigger
    Sticky,
}

/// Session-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Desired update rate in Hz; the closest supported rate is used
    pub target_update_rate: u32,

    /// Radio channel for the wireless master (11..=25)
    pub radio_channel: u8,

    /// Per-device queue capacity; overflow drops the oldest sample
    pub queue_capacity: usize,

    /// Number of segment slots in the pose
    pub max_segments: usize,

    /// Interval between connectivity polls while awaiting children
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,

    /// Upper bound on one aggregation wait when no data arrives
    #[serde(with = "duration_ms")]
    pub tick_interval: Duration,

    /// Give up waiting for children after this long (None = operator-paced)
    #[serde(rename = "await_children_timeout_ms", with = "opt_duration_ms")]
    pub await_children_timeout: Option<Duration>,

    /// Calibration trigger semantics
    pub calibration_mode: CalibrationMode,

    /// Capture a reference pose on the first sweep
    pub calibrate_on_start: bool,

    /// Serials of the sensors this session tracks
    pub allow_list: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            target_update_rate: 60,
            radio_channel: 19,
            queue_capacity: 300,
            max_segments: 10,
            poll_interval: Duration::from_millis(100),
            tick_interval: Duration::from_millis(5),
            await_children_timeout: None,
            calibration_mode: CalibrationMode::ConsumeOnce,
            calibrate_on_start: true,
            allow_list: DEFAULT_ALLOW_LIST.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl SessionConfig {
    /// Create a configuration tracking the given serials
    pub fn with_allow_list<I, S>(serials: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allow_list: serials.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Set the desired update rate
    pub fn with_update_rate(mut self, rate: u32) -> Self {
        self.target_update_rate = rate;
        self
    }

    /// Set the radio channel
    pub fn with_radio_channel(mut self, channel: u8) -> Self {
        self.radio_channel = channel;
        self
    }

    /// Set the per-device queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the number of segment slots
    pub fn with_max_segments(mut self, max_segments: usize) -> Self {
        self.max_segments = max_segments;
        self
    }

    /// Set the connectivity poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the aggregation wait bound
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Bound the wait for children
    pub fn with_await_timeout(mut self, timeout: Duration) -> Self {
        self.await_children_timeout = Some(timeout);
        self
    }

    /// Set calibration semantics
    pub fn with_calibration(mut self, mode: CalibrationMode, on_start: bool) -> Self {
        self.calibration_mode = mode;
        self.calibrate_on_start = on_start;
        self
    }

    /// Parse a configuration from JSON; missing fields take defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check the configuration for values the hardware would reject
    pub fn validate(&self) -> Result<()> {
        if self.allow_list.is_empty() {
            return Err(SessionError::InvalidConfig("allow-list is empty".into()));
        }
        if self.queue_capacity == 0 {
            return Err(SessionError::InvalidConfig(
                "queue capacity must be at least 1".into(),
            ));
        }
        if self.max_segments == 0 {
            return Err(SessionError::InvalidConfig(
                "at least one segment slot is required".into(),
            ));
        }
        if !(MIN_RADIO_CHANNEL..=MAX_RADIO_CHANNEL).contains(&self.radio_channel) {
            return Err(SessionError::InvalidConfig(format!(
                "radio channel {} outside {}..={}",
                self.radio_channel, MIN_RADIO_CHANNEL, MAX_RADIO_CHANNEL
            )));
        }
        if self.target_update_rate == 0 {
            return Err(SessionError::InvalidConfig(
                "target update rate must be positive".into(),
            ));
        }
        Ok(())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

mod opt_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
