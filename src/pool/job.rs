// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Job descriptors. These are serialised to JSON by the controller and
//! decoded by a worker before being run, so everything a job needs must be in
//! here; workers share nothing with the controller except the image store.

use std::path::PathBuf;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::{
    engine::{CleanSummary, PartialSummary},
    image::ImageGrid,
    params::{Algorithm, FtMachine, Weighting},
    partition::{ChannelRange, CubeChunk, PartitionAssignment},
};

/// A unit of work for a single worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum Job {
    /// Make partial continuum images.
    Continuum(ContinuumJob),

    /// Image and deconvolve a chunk of a cube.
    Cube(CubeJob),

    /// Delete images from the store.
    Cleanup { images: Vec<String> },

    /// Compute the weight density of the data last gridded and keep it as
    /// the worker variable [`WEIGHT_GRID_VARIABLE`].
    WeightDensity,

    /// Replace the worker's weight density.
    SetWeightDensity { density: Array2<f32> },

    /// Return one of the worker's variables.
    Pull { name: String },
}

/// The worker variable holding the last computed weight density.
pub const WEIGHT_GRID_VARIABLE: &str = "weight_grid";

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::Continuum(_) => "continuum",
            Job::Cube(_) => "cube",
            Job::Cleanup { .. } => "cleanup",
            Job::WeightDensity => "weight_density",
            Job::SetWeightDensity { .. } => "set_weight_density",
            Job::Pull { .. } => "pull",
        }
    }
}

/// Grid one partition's visibilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuumJob {
    pub dataset: PathBuf,
    pub assignment: PartitionAssignment,

    /// The channels to grid. Channel partitions grid their own channels; other
    /// partitions grid every channel of the selected band.
    pub channels: Vec<ChannelRange>,

    /// The stem of this worker's partial images.
    pub stem: String,

    pub grid: ImageGrid,
    pub nterms: usize,

    /// Every worker uses the same reference frequency \[Hz\] so that Taylor
    /// terms can be combined.
    pub reference_freq: f64,

    /// \[Hz\]
    pub bandwidth: f64,

    /// The stem of the model images to predict from; `None` starts from an
    /// empty model.
    pub model: Option<String>,

    pub weighting: Weighting,
    pub ftmachine: FtMachine,

    /// Make PSFs (only needed in the first major cycle).
    pub make_psf: bool,

    /// Make flux and primary-beam coverage images (mosaics, first major cycle
    /// only).
    pub make_coverage: bool,
}

/// Image a chunk of a spectral cube from start to finish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CubeJob {
    pub dataset: PathBuf,
    pub chunk: CubeChunk,

    /// The stem of this chunk's images.
    pub stem: String,

    /// The grid of this chunk (not the whole cube).
    pub grid: ImageGrid,

    pub niter: u32,
    pub npercycle: u32,
    pub majorcycles: i32,
    pub cyclefactor: f64,

    /// \[Jy\]
    pub threshold: f64,

    pub gain: f64,
    pub algorithm: Algorithm,
    pub scales: Vec<f64>,
    pub weighting: Weighting,
    pub ftmachine: FtMachine,
    pub mask: Option<String>,
}

/// Something kept by a worker between jobs.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerValue {
    WeightGrid(Array2<f32>),
}

/// What a finished job handed back.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutput {
    Partial(PartialSummary),
    Clean(CleanSummary),
    Value(WorkerValue),
    Done,
}
