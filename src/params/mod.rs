// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Parameters for imaging runs.
//!
//! The code here is kind of "mirroring" the arguments a driver would take; the
//! difference is that everything here has been parsed and checked, and is
//! ready to be used directly by [`crate::imaging`].

mod error;

pub use error::ParamsError;

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{
    constants::*,
    image::ImageGrid,
    partition::CubeSpec,
};

/// Minor-cycle algorithms.
#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, EnumIter, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Clark,
    Hogbom,
    Multiscale,
    Mtmfs,
}

/// Visibility weighting schemes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "lowercase")]
pub enum Weighting {
    Natural,
    Uniform,
    Briggs { robust: f64 },
}

impl Weighting {
    /// Does this weighting need the weight density of all the data, i.e.
    /// does every worker need to know about every other worker's weights?
    pub fn needs_weight_density(&self) -> bool {
        !matches!(self, Weighting::Natural)
    }
}

/// Gridding machines.
#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, EnumIter, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FtMachine {
    Ft,
    Wproject,
    Mosaic,
}

/// How visibilities are shared between workers for continuum imaging.
#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, EnumIter, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PartitionMode {
    Channel,
    Time,
}

/// Where the workers run.
#[derive(Debug, Clone, Default)]
pub struct PoolParams {
    /// If empty, a single local host is used.
    pub hosts: Vec<String>,

    /// Workers started on each host.
    pub workers_per_host: usize,

    /// One per host, or a single directory used for all hosts. If empty, the
    /// current working directory is used.
    pub scratch_dirs: Vec<PathBuf>,
}

impl PoolParams {
    pub fn local(num_workers: usize) -> PoolParams {
        PoolParams {
            hosts: vec![],
            workers_per_host: num_workers,
            scratch_dirs: vec![],
        }
    }

    /// The number of workers this pool will have.
    pub fn num_workers(&self) -> usize {
        self.hosts.len().max(1) * self.workers_per_host
    }
}

/// Parameters common to all imaging modes.
#[derive(Debug, Clone)]
pub struct ImagingParams {
    /// The stem of all output images.
    pub imagename: String,

    /// The output image grid. For continuum imaging, this has a single
    /// channel.
    pub grid: ImageGrid,

    /// The total number of minor-cycle iterations.
    pub niter: u32,

    /// The maximum number of minor-cycle iterations per major cycle.
    pub npercycle: u32,

    /// The number of major cycles. Zero or less means as many as it takes.
    pub majorcycles: i32,

    pub cyclefactor: f64,

    /// The stopping threshold \[Jy\].
    pub threshold: f64,

    pub gain: f64,
    pub algorithm: Algorithm,

    /// Scale sizes \[pixels\] for multi-scale algorithms.
    pub scales: Vec<f64>,

    pub weighting: Weighting,
    pub ftmachine: FtMachine,

    /// The name of a clean mask image in the image store.
    pub mask: Option<String>,

    pub pb_limit: f64,
    pub poll_interval: Duration,
    pub pool: PoolParams,
}

impl ImagingParams {
    /// Parameters with the usual defaults.
    pub fn new(imagename: &str, grid: ImageGrid, pool: PoolParams) -> ImagingParams {
        ImagingParams {
            imagename: imagename.to_string(),
            grid,
            niter: DEFAULT_NITER,
            npercycle: DEFAULT_NPERCYCLE,
            majorcycles: 0,
            cyclefactor: DEFAULT_CYCLE_FACTOR,
            threshold: 0.0,
            gain: DEFAULT_GAIN,
            algorithm: Algorithm::Clark,
            scales: vec![],
            weighting: Weighting::Natural,
            ftmachine: FtMachine::Ft,
            mask: None,
            pb_limit: DEFAULT_PB_LIMIT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            pool,
        }
    }

    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.imagename.trim().is_empty() {
            return Err(ParamsError::NoImageName);
        }
        self.grid.validate()?;
        if !(self.gain > 0.0 && self.gain <= 1.0) {
            return Err(ParamsError::Gain(self.gain));
        }
        if !(self.cyclefactor > 0.0) || !self.cyclefactor.is_finite() {
            return Err(ParamsError::CycleFactor(self.cyclefactor));
        }
        if !(self.threshold >= 0.0) {
            return Err(ParamsError::Threshold(self.threshold));
        }
        if !(0.0..1.0).contains(&self.pb_limit) {
            return Err(ParamsError::PbLimit(self.pb_limit));
        }
        if self.algorithm == Algorithm::Multiscale && self.scales.is_empty() {
            return Err(ParamsError::NoScales);
        }
        if self.pool.workers_per_host == 0 {
            return Err(ParamsError::NoWorkers);
        }
        Ok(())
    }

    /// The number of minor-cycle iterations in each major cycle, and the
    /// maximum number of major cycles (`None` if there's no limit).
    ///
    /// With a fixed number of major cycles, the iterations are split evenly
    /// over them. If that leaves nothing per cycle, all iterations go into a
    /// single major cycle.
    pub fn iteration_plan(&self) -> (u32, Option<u32>) {
        if self.majorcycles > 0 {
            let majorcycles = self.majorcycles as u32;
            let per_cycle = self.niter / majorcycles;
            if per_cycle == 0 {
                (self.niter, Some(1))
            } else {
                (per_cycle, Some(majorcycles))
            }
        } else {
            (self.npercycle.min(self.niter), None)
        }
    }
}

/// Parameters for continuum (and wideband) imaging.
#[derive(Debug, Clone)]
pub struct ContinuumParams {
    pub imaging: ImagingParams,

    /// The number of Taylor terms; 1 is plain continuum imaging.
    pub nterms: usize,

    pub dopbcorr: bool,

    /// Continue from an existing model.
    pub contclean: bool,

    pub partition_mode: PartitionMode,

    /// Spectral window IDs to image; all if `None`.
    pub spws: Option<Vec<usize>>,

    /// Only channels within this (inclusive) frequency range \[Hz\] are
    /// imaged.
    pub freq_range: Option<(f64, f64)>,

    /// The number of partitions. Defaults to the number of workers.
    pub num_partitions: Option<usize>,
}

impl ContinuumParams {
    pub fn new(imaging: ImagingParams) -> ContinuumParams {
        ContinuumParams {
            imaging,
            nterms: 1,
            dopbcorr: true,
            contclean: false,
            partition_mode: PartitionMode::Channel,
            spws: None,
            freq_range: None,
            num_partitions: None,
        }
    }

    pub fn validate(&self) -> Result<(), ParamsError> {
        self.imaging.validate()?;
        if self.nterms == 0 {
            return Err(ParamsError::NoTaylorTerms);
        }
        if self.imaging.algorithm == Algorithm::Mtmfs && self.nterms < 2 {
            return Err(ParamsError::MtmfsNeedsTerms);
        }
        if self.imaging.grid.nchan != 1 {
            return Err(ParamsError::ContinuumChannels(self.imaging.grid.nchan));
        }
        if let Some((lo, hi)) = self.freq_range {
            if !(lo <= hi) {
                return Err(ParamsError::FreqRange { lo, hi });
            }
        }
        if self.num_partitions == Some(0) {
            return Err(ParamsError::NoWorkers);
        }
        Ok(())
    }
}

/// Parameters for spectral-line cube imaging.
#[derive(Debug, Clone)]
pub struct CubeParams {
    /// The spectral axis of `imaging.grid` describes the whole cube.
    pub imaging: ImagingParams,

    /// The maximum number of output channels imaged by a single job.
    pub chanchunk: usize,

    /// Spectral window IDs to image; all if `None`.
    pub spws: Option<Vec<usize>>,
}

impl CubeParams {
    pub fn validate(&self) -> Result<(), ParamsError> {
        self.imaging.validate()?;
        if self.chanchunk == 0 {
            return Err(ParamsError::ZeroChanChunk);
        }
        Ok(())
    }

    pub fn cube_spec(&self) -> CubeSpec {
        let grid = &self.imaging.grid;
        CubeSpec {
            nchan: grid.nchan,
            chanchunk: self.chanchunk,
            freq_start: grid.freq_start,
            freq_step: grid.freq_step,
        }
    }
}
