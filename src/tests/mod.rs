// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Helpful things for tests.
//!
//! [`SkyEngine`] "observes" a fixed sky: every partial residual is the sky
//! minus the model it was given, every sum of weights is 1, and every PSF is a
//! delta function at the reference pixel. [`GainDeconvolver`] removes a
//! fraction `gain` of the masked residual in every minor cycle.

use std::{collections::HashMap, path::PathBuf, sync::Mutex};

use itertools::Itertools;
use ndarray::Array2;

use crate::{
    combine::ImageSet,
    engine::*,
    image::{Image, ImageGrid, ImageKind},
    partition::SpectralWindow,
    pool::{ContinuumJob, CubeJob},
};

/// What a [`SkyEngine`] was asked to do.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct JobRecord {
    pub(crate) worker: usize,
    pub(crate) stem: String,
    pub(crate) model: Option<String>,

    /// The assignment's selection string (empty for cube chunks).
    pub(crate) selection: String,

    /// The channels gridded, as a selection string.
    pub(crate) channels: String,

    pub(crate) scratch_dir: PathBuf,
    pub(crate) scratch_dir_existed: bool,
}

pub(crate) struct SkyEngine {
    pub(crate) sky: Image,

    /// Every job on this worker fails.
    pub(crate) fail_worker: Option<usize>,

    pub(crate) jobs: Mutex<Vec<JobRecord>>,
    pub(crate) densities: Mutex<HashMap<usize, Array2<f32>>>,
}

impl SkyEngine {
    pub(crate) fn new(sky: Image) -> SkyEngine {
        SkyEngine {
            sky,
            fail_worker: None,
            jobs: Mutex::new(vec![]),
            densities: Mutex::new(HashMap::new()),
        }
    }

    fn check(
        &self,
        ctx: &JobContext,
        stem: &str,
        model: Option<&String>,
        selection: String,
        channels: String,
    ) -> Result<(), EngineError> {
        if self.fail_worker == Some(ctx.worker) {
            return Err(EngineError::Failed(format!("worker {} fell over", ctx.worker)));
        }
        self.jobs.lock().unwrap().push(JobRecord {
            worker: ctx.worker,
            stem: stem.to_string(),
            model: model.cloned(),
            selection,
            channels,
            scratch_dir: ctx.scratch_dir.to_path_buf(),
            scratch_dir_existed: ctx.scratch_dir.is_dir(),
        });
        Ok(())
    }
}

impl ImagingEngine for SkyEngine {
    fn make_partial_images(
        &self,
        ctx: &JobContext,
        job: &ContinuumJob,
    ) -> Result<PartialSummary, EngineError> {
        self.check(
            ctx,
            &job.stem,
            job.model.as_ref(),
            job.assignment.selection_string(),
            job.channels.iter().join(","),
        )?;

        let nterms = job.nterms;
        let mut set = ImageSet::zeros(job.grid, nterms);
        if let Some(model_stem) = &job.model {
            for (t, model) in set.models.iter_mut().enumerate() {
                *model = ctx
                    .store
                    .read(&ImageKind::Model.name(model_stem, t, nterms))
                    .map_err(|_| EngineError::MissingInput(model_stem.clone()))?;
            }
        }
        set.residuals[0] = self.sky.calc(&set.models[0], |s, m| s - m)?;
        for sumwt in set.sumwts.iter_mut() {
            *sumwt = Image::filled(job.grid, 1.0);
        }
        let centre = (
            0,
            job.grid.ref_pixel[1] as usize,
            job.grid.ref_pixel[0] as usize,
        );
        for psf in set.psfs.iter_mut() {
            psf.data[centre] = 1.0;
        }
        set.write(ctx.store, &job.stem)?;

        if job.make_coverage {
            let ones = Image::filled(job.grid, 1.0);
            ctx.store
                .write(&ImageKind::Flux.plain_name(&job.stem), &ones)?;
            ctx.store
                .write(&ImageKind::PbCoverage.plain_name(&job.stem), &ones)?;
        }

        Ok(PartialSummary {
            peak_residual: set.residuals[0].stats().peak_abs,
            peak_sumwt: 1.0,
        })
    }

    fn image_cube_chunk(&self, ctx: &JobContext, job: &CubeJob) -> Result<CleanSummary, EngineError> {
        self.check(
            ctx,
            &job.stem,
            None,
            String::new(),
            job.chunk.selection.iter().join(","),
        )?;

        let index = job.chunk.index;
        let image = Image::filled(job.grid, index as f32 + 1.0);
        for kind in [
            ImageKind::Image,
            ImageKind::Model,
            ImageKind::Residual,
            ImageKind::Psf,
        ] {
            ctx.store.write(&kind.plain_name(&job.stem), &image)?;
        }
        Ok(CleanSummary {
            iterations: 10 * (index as u32 + 1),
            max_residual: 0.1 * (index as f32 + 1.0),
            converged: index != 1,
        })
    }

    fn weight_density(&self, ctx: &JobContext) -> Result<Array2<f32>, EngineError> {
        Ok(Array2::from_elem((2, 2), (ctx.worker + 1) as f32))
    }

    fn set_weight_density(&self, ctx: &JobContext, density: &Array2<f32>) -> Result<(), EngineError> {
        self.densities
            .lock()
            .unwrap()
            .insert(ctx.worker, density.clone());
        Ok(())
    }
}

/// Removes `gain` of the masked residual each minor cycle, counting that as a
/// single iteration. If `diverge` is set, the model increment is garbage.
pub(crate) struct GainDeconvolver {
    pub(crate) diverge: bool,
}

impl Deconvolver for GainDeconvolver {
    fn deconvolve(&self, request: &DeconvolveRequest) -> Result<DeconvolveOutcome, EngineError> {
        let peak = request.residuals[0].stats().peak_abs;
        let mut increments: Vec<Image> = request
            .residuals
            .iter()
            .map(|r| Image::zeros(r.grid))
            .collect();
        if request.niter == 0 {
            return Ok(DeconvolveOutcome {
                increments,
                iterations: 0,
                max_residual: peak,
                converged: false,
            });
        }

        let gain = request.gain as f32;
        increments[0] = request.residuals[0].calc(request.mask, |r, m| {
            if m > 0.0 {
                r * gain
            } else {
                0.0
            }
        })?;
        let mut max_residual = (1.0 - gain) * peak;
        if self.diverge {
            increments[0].data.fill(f32::NAN);
            max_residual = f32::NAN;
        }
        Ok(DeconvolveOutcome {
            increments,
            iterations: 1,
            max_residual,
            converged: max_residual as f64 <= request.threshold,
        })
    }

    fn restore(
        &self,
        models: &[Image],
        residuals: &[Image],
        _psfs: &[Image],
    ) -> Result<Vec<Image>, EngineError> {
        models
            .iter()
            .zip(residuals)
            .map(|(m, r)| m.calc(r, |a, b| a + b).map_err(EngineError::from))
            .collect()
    }
}

/// An 8x8 single-channel grid.
pub(crate) fn small_grid() -> ImageGrid {
    ImageGrid::new(8, 8, 1, 1e-4, 150e6, 1e6)
}

/// A sky with a single point source of `flux` at (y, x) = (2, 3).
pub(crate) fn point_source_sky(flux: f32) -> Image {
    let mut sky = Image::zeros(small_grid());
    sky.data[(0, 2, 3)] = flux;
    sky
}

/// Spectral windows of `num_chans` channels of 1 MHz each, one after the
/// other.
pub(crate) fn contiguous_spws(num_spws: usize, num_chans: usize) -> Vec<SpectralWindow> {
    (0..num_spws)
        .map(|id| SpectralWindow {
            id,
            freqs: vec1::Vec1::try_from_vec(
                (0..num_chans)
                    .map(|c| 100e6 + ((id * num_chans + c) as f64) * 1e6)
                    .collect(),
            )
            .unwrap(),
        })
        .collect()
}
