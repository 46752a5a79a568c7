// PoseSync Sim - Simulated wireless sensor rig
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Slow random-walk rotation for simulated sensors.

use nalgebra::{UnitQuaternion, Vector3};
use posesync::Quaternion;
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

/// Orientation that drifts by a small random rotation per step.
#[derive(Debug)]
pub struct RandomWalk {
    rng: StdRng,
    step: Option<Normal<f64>>,
    current: UnitQuaternion<f64>,
}

impl RandomWalk {
    /// Start at identity; `step_std` is the per-axis step in radians.
    pub fn new(step_std: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            // A zero deviation freezes the walk.
            step: Normal::new(0.0, step_std).ok().filter(|_| step_std > 0.0),
            current: UnitQuaternion::identity(),
        }
    }

    /// Current orientation.
    pub fn current(&self) -> Quaternion {
        Quaternion::from(self.current)
    }

    /// Advance one step and return the new orientation.
    pub fn next_orientation(&mut self) -> Quaternion {
        if let Some(step) = &self.step {
            let axis = Vector3::new(
                step.sample(&mut self.rng),
                step.sample(&mut self.rng),
                step.sample(&mut self.rng),
            );
            self.current *= UnitQuaternion::from_scaled_axis(axis);
        }
        self.current()
    }
}
