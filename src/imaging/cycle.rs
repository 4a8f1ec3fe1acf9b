// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Book-keeping for the major-cycle loop.

use log::{debug, info};
use strum_macros::{Display, IntoStaticStr};

/// What the controller is doing.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Planning,
    Dispatching,
    Waiting,
    Combining,
    Checking,
    Deconvolving,
    Done,
}

#[derive(Debug, Clone)]
pub struct MajorCycleState {
    pub stage: Stage,

    /// The number of gridding passes started.
    pub cycle: u32,

    /// The number of minor cycles run.
    pub minor_cycles: u32,

    /// The peak residual of the last combined residual image \[Jy\].
    pub peak_residual: f32,

    /// The minor-cycle stopping threshold of the current cycle \[Jy\].
    pub cycle_threshold: f64,

    pub iterations: u32,
    pub remaining_iterations: u32,
    pub converged: bool,
    pub diverged: bool,

    /// Every stage entered, tagged with the cycle it was entered in.
    pub history: Vec<(u32, Stage)>,
}

impl MajorCycleState {
    pub fn new(niter: u32) -> MajorCycleState {
        MajorCycleState {
            stage: Stage::Planning,
            cycle: 0,
            minor_cycles: 0,
            peak_residual: f32::INFINITY,
            cycle_threshold: 0.0,
            iterations: 0,
            remaining_iterations: niter,
            converged: false,
            diverged: false,
            history: vec![],
        }
    }

    pub fn enter(&mut self, stage: Stage) {
        debug!("Major cycle {}: {stage}", self.cycle);
        self.stage = stage;
        self.history.push((self.cycle, stage));
    }

    /// Given the peak residual of the latest combined residual image, should
    /// the loop stop?
    pub fn check(&mut self, peak: f32, threshold: f64, max_minor_cycles: Option<u32>) -> bool {
        self.peak_residual = peak;
        if self.diverged || !peak.is_finite() {
            self.converged = false;
            return true;
        }

        if peak as f64 <= threshold {
            info!("Peak residual {peak} Jy is at or below the threshold ({threshold} Jy)");
            self.converged = true;
        } else if self.remaining_iterations <= 1 {
            info!("Iteration limit reached");
            self.converged = true;
        } else if max_minor_cycles.map(|m| self.minor_cycles >= m).unwrap_or(false) {
            info!("Major cycle limit reached");
            self.converged = true;
        }
        self.converged
    }

    /// Account for a finished minor cycle.
    pub fn record_minor_cycle(&mut self, iterations: u32) {
        self.minor_cycles += 1;
        self.iterations += iterations;
        self.remaining_iterations = self.remaining_iterations.saturating_sub(iterations);
    }

    /// The minor cycle went bad. Nothing more will be cleaned.
    pub fn diverge(&mut self) {
        self.diverged = true;
        self.converged = false;
        self.remaining_iterations = 0;
    }
}
