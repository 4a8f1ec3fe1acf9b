// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The services that actually touch visibilities and pixels.
//!
//! Gridding, transforming and minor-cycle deconvolution are not done in this
//! crate; implementors of [`ImagingEngine`] and [`Deconvolver`] provide them.
//! This crate only decides what to image where, and combines the results.


use std::path::Path;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    constants::BEAM_GUESS_DIVISOR,
    image::{Image, ImageError, ImageStore},
    params::Algorithm,
    pool::{ContinuumJob, CubeJob},
};

/// What a job can see of the worker running it.
pub struct JobContext<'a> {
    pub worker: usize,
    pub host: &'a str,

    /// This worker's private scratch directory.
    pub scratch_dir: &'a Path,

    pub store: &'a dyn ImageStore,
}

/// The result of a continuum gridding pass on one worker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PartialSummary {
    /// The peak absolute value of this worker's zeroth Taylor-term residual.
    pub peak_residual: f32,

    /// The peak of this worker's zeroth Taylor-term sum of weights.
    pub peak_sumwt: f32,
}

/// The result of a self-contained imaging and deconvolution run (a cube
/// chunk).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CleanSummary {
    pub iterations: u32,
    pub max_residual: f32,
    pub converged: bool,
}

/// Grids and transforms visibilities. A single engine is shared by all
/// workers, so any per-worker state (e.g. weight densities) must be keyed by
/// [`JobContext::worker`].
pub trait ImagingEngine: Send + Sync {
    /// Grid the job's visibilities, predicting from the job's starting model
    /// (if any), and write the partial [`crate::ImageSet`] called `job.stem`
    /// into the store. The partial residuals must be normalised by this
    /// worker's own sum of weights.
    fn make_partial_images(
        &self,
        ctx: &JobContext,
        job: &ContinuumJob,
    ) -> Result<PartialSummary, EngineError>;

    /// Image and deconvolve a chunk of a spectral cube, writing the chunk's
    /// model, residual, PSF and restored image (named from `job.stem`) into the
    /// store.
    fn image_cube_chunk(&self, ctx: &JobContext, job: &CubeJob) -> Result<CleanSummary, EngineError>;

    /// The weight density grid of the data last gridded on this worker.
    fn weight_density(&self, ctx: &JobContext) -> Result<Array2<f32>, EngineError>;

    /// Use this weight density grid (the sum over all workers) for all
    /// subsequent gridding on this worker.
    fn set_weight_density(&self, ctx: &JobContext, density: &Array2<f32>) -> Result<(), EngineError>;
}

/// Everything the minor cycle needs.
pub struct DeconvolveRequest<'a> {
    /// One per Taylor term.
    pub residuals: &'a [Image],

    /// `2 * nterms - 1` of them.
    pub psfs: &'a [Image],

    pub mask: &'a Image,
    pub algorithm: Algorithm,
    pub scales: &'a [f64],

    /// The maximum number of iterations to do.
    pub niter: u32,

    /// Stop when the peak residual is at or below this \[Jy\].
    pub threshold: f64,

    pub gain: f64,
}

/// What the minor cycle did.
#[derive(Debug, Clone, PartialEq)]
pub struct DeconvolveOutcome {
    /// The model found in this minor cycle, one per Taylor term. This is added
    /// to the existing model.
    pub increments: Vec<Image>,

    pub iterations: u32,

    /// The peak residual when the minor cycle stopped.
    pub max_residual: f32,

    pub converged: bool,
}

/// The minor cycle.
pub trait Deconvolver: Send + Sync {
    fn deconvolve(&self, request: &DeconvolveRequest) -> Result<DeconvolveOutcome, EngineError>;

    /// Restore the models (convolve with the clean beam and add the
    /// residuals). Returns one restored image per Taylor term.
    fn restore(
        &self,
        models: &[Image],
        residuals: &[Image],
        psfs: &[Image],
    ) -> Result<Vec<Image>, EngineError>;
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Imaging engine failed: {0}")]
    Failed(String),

    #[error("Imaging engine couldn't find its input '{0}'")]
    MissingInput(String),

    #[error(transparent)]
    Image(#[from] ImageError),
}

/// The largest absolute PSF value outside the main lobe. This is used to set
/// how deep a minor cycle can go before the sidelobes of what it has cleaned
/// need to be properly subtracted in a major cycle.
///
/// The main lobe is taken to be a box of +-2 beam widths around the PSF peak.
/// The beam width is the restoring beam major axis, or if that isn't known,
/// the largest image dimension divided by 50 (but at least a pixel). Only the
/// first channel is examined.
pub fn outer_sidelobe_level(psf: &Image) -> f32 {
    let grid = &psf.grid;
    let beam_pixels = grid
        .beam_major_pixels()
        .filter(|b| b.is_finite() && *b > 0.0)
        .unwrap_or_else(|| (grid.nx.max(grid.ny) / BEAM_GUESS_DIVISOR) as f64)
        .ceil()
        .max(1.0) as usize;
    let half_width = 2 * beam_pixels;

    let plane = psf.data.index_axis(ndarray::Axis(0), 0);
    let (peak_y, peak_x) = plane
        .indexed_iter()
        .filter(|(_, v)| v.is_finite())
        .fold(((0, 0), f32::NEG_INFINITY), |(pos, max), (p, &v)| {
            if v > max {
                (p, v)
            } else {
                (pos, max)
            }
        })
        .0;

    plane
        .indexed_iter()
        .filter(|((y, x), _)| y.abs_diff(peak_y) > half_width || x.abs_diff(peak_x) > half_width)
        .map(|(_, v)| v.abs())
        .filter(|v| v.is_finite())
        .fold(0.0, f32::max)
}
