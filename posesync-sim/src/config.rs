// PoseSync Sim - Simulated wireless sensor rig
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Rig description: which devices exist, how they behave and what fails.

use std::path::Path;

use posesync::DEFAULT_ALLOW_LIST;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};

/// An operation the simulated hardware can be told to fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fault {
    /// The port scan finds nothing.
    EmptyScan,
    /// Opening the master's port fails.
    OpenPort,
    /// The master refuses configuration mode.
    GotoConfig,
    /// Setting the update rate fails.
    SetUpdateRate,
    /// Enabling the radio fails.
    EnableRadio,
    /// The master refuses measurement mode.
    GotoMeasurement,
    /// Resolving this serial yields no device.
    Unresolvable { serial: String },
}

/// One simulated child sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimChild {
    /// Device serial.
    pub serial: String,
    /// Delay after the radio comes up before this child links.
    pub link_delay_ms: u64,
}

impl SimChild {
    /// Create a child that links after `link_delay_ms`.
    pub fn new(serial: impl Into<String>, link_delay_ms: u64) -> Self {
        Self {
            serial: serial.into(),
            link_delay_ms,
        }
    }
}

/// Simulated rig configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Serial of the wireless master.
    pub master_serial: String,
    /// Port the master is attached to.
    pub port: String,
    /// Baud rate reported by the scan.
    pub baud_rate: u32,
    /// Child sensors behind the master.
    pub children: Vec<SimChild>,
    /// Update rates the master reports, in device order.
    pub supported_rates: Vec<u32>,
    /// Whether the radio is already on when the master is opened.
    pub radio_initially_enabled: bool,
    /// Standard deviation of each random-walk step, in radians.
    pub step_std: f64,
    /// Operations that fail.
    pub faults: Vec<Fault>,
    /// Random seed for reproducible motion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            master_serial: "00B00001".to_string(),
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 921_600,
            children: Vec::new(),
            supported_rates: vec![40, 60, 80, 100, 120],
            radio_initially_enabled: false,
            step_std: 0.01,
            faults: Vec::new(),
            seed: None,
        }
    }
}

impl SimConfig {
    /// Create an empty rig.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rig with the first `known` allow-listed sensors and `unknown`
    /// sensors that are on no allow-list.
    ///
    /// Children link 20 ms apart, starting 20 ms after the radio is up.
    pub fn rig(known: usize, unknown: usize) -> Self {
        let known_serials = DEFAULT_ALLOW_LIST
            .iter()
            .take(known)
            .map(|s| s.to_string());
        let unknown_serials = (0..unknown).map(|i| format!("00C0{:04X}", i));
        let children = known_serials
            .chain(unknown_serials)
            .enumerate()
            .map(|(i, serial)| SimChild::new(serial, 20 * (i as u64 + 1)))
            .collect();
        Self {
            children,
            ..Default::default()
        }
    }

    /// Add a child sensor.
    pub fn with_child(mut self, child: SimChild) -> Self {
        self.children.push(child);
        self
    }

    /// Replace the supported update rates.
    pub fn with_supported_rates(mut self, rates: Vec<u32>) -> Self {
        self.supported_rates = rates;
        self
    }

    /// Start with the radio on.
    pub fn with_radio_enabled(mut self) -> Self {
        self.radio_initially_enabled = true;
        self
    }

    /// Inject a failure.
    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.faults.push(fault);
        self
    }

    /// Set random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the random-walk step size.
    pub fn with_step_std(mut self, step_std: f64) -> Self {
        self.step_std = step_std;
        self
    }

    /// Whether `fault` is injected.
    pub fn fails(&self, fault: &Fault) -> bool {
        self.faults.contains(fault)
    }

    /// Serials of every child.
    pub fn child_serials(&self) -> Vec<String> {
        self.children.iter().map(|c| c.serial.clone()).collect()
    }

    /// Load a rig from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the rig for contradictions.
    pub fn validate(&self) -> Result<()> {
        if !self.step_std.is_finite() || self.step_std < 0.0 {
            return Err(SimError::InvalidRig(format!(
                "step_std must be a non-negative number, got {}",
                self.step_std
            )));
        }
        if self.supported_rates.contains(&0) {
            return Err(SimError::InvalidRig("update rate 0 Hz".into()));
        }
        let mut serials = self.child_serials();
        serials.sort();
        serials.dedup();
        if serials.len() != self.children.len() {
            return Err(SimError::InvalidRig("duplicate child serial".into()));
        }
        if serials.contains(&self.master_serial) {
            return Err(SimError::InvalidRig(
                "master serial is also a child serial".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rig_preset() {
        let config = SimConfig::rig(3, 2);
        assert_eq!(config.children.len(), 5);
        assert_eq!(config.children[0].serial, "00B4391F");
        assert_eq!(config.children[3].serial, "00C00000");
        assert_eq!(config.children[4].link_delay_ms, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duplicate_serial_rejected() {
        let config = SimConfig::new()
            .with_child(SimChild::new("00B4391F", 0))
            .with_child(SimChild::new("00B4391F", 10));
        assert!(matches!(config.validate(), Err(SimError::InvalidRig(_))));
    }

    #[test]
    fn test_faults() {
        let config = SimConfig::new().with_fault(Fault::Unresolvable {
            serial: "00B4391F".into(),
        });
        assert!(config.fails(&Fault::Unresolvable {
            serial: "00B4391F".into()
        }));
        assert!(!config.fails(&Fault::OpenPort));
    }

    #[test]
    fn test_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rig.json");
        std::fs::write(
            &path,
            r#"{"children":[{"serial":"00B4391F","link_delay_ms":5}],"faults":["empty_scan"],"seed":7}"#,
        )
        .unwrap();
        let config = SimConfig::from_json_file(&path).unwrap();
        assert_eq!(config.children.len(), 1);
        assert!(config.fails(&Fault::EmptyScan));
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.supported_rates, vec![40, 60, 80, 100, 120]);
    }
}
