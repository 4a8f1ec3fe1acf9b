// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The major-cycle controller.
//!
//! Continuum imaging partitions the data over the workers, then repeats:
//! every worker grids its data against the current model, the partial images
//! are combined, the combined residual is checked against the stopping
//! criteria, and if the loop continues, a minor cycle updates the model, which
//! is handed back to every worker. The final residual therefore always comes
//! from gridding against the final model.
//!
//! Cube imaging is simpler: every chunk of output channels is an independent
//! job, and the chunks are handed to whichever worker is free.

mod cycle;
mod error;

pub use cycle::{MajorCycleState, Stage};
pub use error::ImagingError;

use std::{collections::VecDeque, sync::Arc, thread};

use itertools::Itertools;
use log::{debug, info, trace, warn};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::{
    combine::{spectral_index, ImageCombiner, ImageSet},
    constants::WORKER_IMAGE_PREFIX,
    engine::{
        outer_sidelobe_level, CleanSummary, DeconvolveRequest, Deconvolver, EngineError,
        ImagingEngine,
    },
    image::{Image, ImageGrid, ImageKind, ImageStore},
    mask,
    params::{ContinuumParams, CubeParams, FtMachine, PartitionMode},
    partition::{
        plan_channels, plan_cube_chunks, plan_time, DatasetInfo, PartitionAssignment, Selection,
    },
    pool::{
        make_progress_bar, ContinuumJob, CubeJob, Job, JobHandle, JobOutput, WorkerPool,
        WorkerPoolError, WorkerValue, WEIGHT_GRID_VARIABLE,
    },
};

/// The outcome of an imaging run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImagingResult {
    /// The total number of minor-cycle iterations. For cubes, this is the
    /// largest number done for any chunk.
    pub iterations: u32,

    /// The peak residual \[Jy\]. For cubes, this is the largest over all
    /// chunks.
    pub max_residual: f32,

    pub converged: bool,

    /// The number of major cycles that ran a minor cycle; this is what the
    /// `majorcycles` limit counts. The final gridding pass, which only
    /// measures the residual, isn't counted. Cube chunks run their own major
    /// cycles, so this is 0 for cubes.
    pub major_cycles: u32,
}

/// The stem of the images belonging to a worker (or a cube chunk).
fn worker_stem(imagename: &str, index: usize) -> String {
    format!("{imagename}.{WORKER_IMAGE_PREFIX}{index}")
}

/// Image the continuum (optionally with Taylor terms) of a dataset.
///
/// The output images (`.image`, `.residual`, `.psf`, `.model`, `.sumwt`,
/// `.mask`, plus `.alpha` and `.beta` for wideband runs and `.flux` and
/// `.pbcoverage` for mosaics) are written to `store`.
pub fn continuum(
    params: &ContinuumParams,
    dataset: &DatasetInfo,
    engine: Arc<dyn ImagingEngine>,
    deconvolver: &dyn Deconvolver,
    store: Arc<dyn ImageStore>,
) -> Result<ImagingResult, ImagingError> {
    params.validate()?;
    let imaging = &params.imaging;
    let imagename = imaging.imagename.as_str();
    let nterms = params.nterms;
    let mosaic = imaging.ftmachine == FtMachine::Mosaic;
    let mut state = MajorCycleState::new(imaging.niter);

    state.enter(Stage::Planning);
    let num_workers = imaging.pool.num_workers();
    let num_partitions = params.num_partitions.unwrap_or(num_workers);
    if num_partitions > num_workers {
        return Err(ImagingError::TooManyPartitions {
            num_partitions,
            num_workers,
        });
    }
    let spws = dataset.select_spws(params.spws.as_deref())?;
    // The channel plan also gives the band covered, which every worker needs
    // regardless of how the data are partitioned.
    let band = plan_channels(&spws, num_partitions, params.freq_range, true)?;
    let assignments: Vec<PartitionAssignment> = match params.partition_mode {
        PartitionMode::Channel => band.assignments.clone().into_vec(),
        PartitionMode::Time => plan_time(&dataset.observations, num_partitions)?.into_vec(),
    };
    let reference_freq = band.reference_freq();
    let bandwidth = band.bandwidth();
    let band_channels = band.band_selection();
    info!(
        "Imaging {:.3}-{:.3} MHz (reference {:.3} MHz) over {num_partitions} {} partitions",
        band.freq_range.0 / 1e6,
        band.freq_range.1 / 1e6,
        reference_freq / 1e6,
        params.partition_mode,
    );
    let active: Vec<&PartitionAssignment> = assignments.iter().filter(|a| !a.is_empty()).collect();
    for a in &assignments {
        if a.is_empty() {
            debug!("Partition {} is empty and won't be imaged", a.worker);
        } else {
            debug!("Partition {}: {}", a.worker, a.selection_string());
        }
    }

    let initial_models = prepare_outputs(params, store.as_ref())?;
    let mut pool = WorkerPool::setup(
        &imaging.pool,
        engine,
        Arc::clone(&store),
        imaging.poll_interval,
    )?;
    let combiner = ImageCombiner {
        pb_limit: imaging.pb_limit,
        dopbcorr: params.dopbcorr,
    };
    let (per_cycle, max_minor_cycles) = imaging.iteration_plan();
    debug!("Up to {per_cycle} iterations per minor cycle, up to {max_minor_cycles:?} minor cycles");

    // The global model. Only this function changes it; workers get copies.
    let mut have_model = initial_models.is_some();
    let mut models = initial_models.unwrap_or_else(|| vec![Image::zeros(imaging.grid); nterms]);
    if have_model {
        for a in &active {
            write_models(store.as_ref(), &worker_stem(imagename, a.worker), &models)?;
        }
    }

    // These are all set by the first combination.
    let mut psfs: Vec<Image> = vec![];
    let mut residuals: Vec<Image> = vec![];
    let mut sumwts: Vec<Image> = vec![];
    let mut clean_mask = Image::zeros(imaging.grid);
    let mut sidelobe_level = 0.0;

    loop {
        state.cycle += 1;
        let first = state.cycle == 1;

        state.enter(Stage::Dispatching);
        let mut handles = Vec::with_capacity(active.len());
        for a in &active {
            let stem = worker_stem(imagename, a.worker);
            let job = ContinuumJob {
                dataset: dataset.path.clone(),
                assignment: (*a).clone(),
                channels: match &a.selection {
                    Selection::Channels(ranges) => ranges.clone(),
                    Selection::Time(_) => band_channels.clone(),
                },
                model: have_model.then(|| stem.clone()),
                stem,
                grid: imaging.grid,
                nterms,
                reference_freq,
                bandwidth,
                weighting: imaging.weighting,
                ftmachine: imaging.ftmachine,
                make_psf: first,
                make_coverage: first && mosaic,
            };
            handles.push(pool.dispatch(a.worker, &Job::Continuum(job))?);
        }

        state.enter(Stage::Waiting);
        let outputs = pool.wait_all(handles, "Gridding");
        check_outputs(outputs, &active, dataset)?;
        if first && imaging.weighting.needs_weight_density() {
            exchange_weight_density(&mut pool, &active)?;
        }

        state.enter(Stage::Combining);
        let partials = active
            .iter()
            .map(|a| ImageSet::read(store.as_ref(), &worker_stem(imagename, a.worker), nterms))
            .collect::<Result<Vec<_>, _>>()?;
        if first {
            let combined = combiner.combine(&partials)?;
            psfs = combined.psfs;
            residuals = combined.residuals;
            sumwts = combined.sumwts;

            clean_mask = mask::get_or_build(store.as_ref(), imaging.mask.as_deref(), &residuals[0])?;
            if mosaic {
                let coverage = combine_coverage(&combiner, store.as_ref(), imagename, &active)?;
                clean_mask = mask::restrict_to_coverage(&clean_mask, &coverage)?;
            }
            sidelobe_level = outer_sidelobe_level(&psfs[0]);
            debug!("Outer PSF sidelobe level: {sidelobe_level}");
        } else {
            (residuals, sumwts) = combiner.combine_residuals(&partials)?;
        }

        state.enter(Stage::Checking);
        let peak = residuals[0].stats().peak_abs;
        info!("Major cycle {}: peak residual {peak} Jy", state.cycle);
        if state.check(peak, imaging.threshold, max_minor_cycles) {
            break;
        }

        state.enter(Stage::Deconvolving);
        state.cycle_threshold =
            (sidelobe_level as f64 * imaging.cyclefactor * peak as f64).max(imaging.threshold);
        let niter = state.remaining_iterations.min(per_cycle);
        debug!(
            "Minor cycle: up to {niter} iterations down to {} Jy",
            state.cycle_threshold
        );
        let outcome = deconvolver.deconvolve(&DeconvolveRequest {
            residuals: &residuals,
            psfs: &psfs,
            mask: &clean_mask,
            algorithm: imaging.algorithm,
            scales: &imaging.scales,
            niter,
            threshold: state.cycle_threshold,
            gain: imaging.gain,
        })?;
        if outcome.increments.len() != nterms {
            return Err(EngineError::Failed(format!(
                "the minor cycle gave {} model terms, but {nterms} were expected",
                outcome.increments.len()
            ))
            .into());
        }

        let diverged = !outcome.max_residual.is_finite()
            || outcome.max_residual > peak
            || outcome
                .increments
                .iter()
                .any(|i| i.data.iter().any(|v| !v.is_finite()));
        if diverged {
            warn!(
                "{}",
                ImagingError::DeconvolveDivergence {
                    cycle: state.cycle,
                    peak: outcome.max_residual,
                }
            );
            // The residuals are still those of the current model, so there's
            // no need for another pass.
            state.diverge();
            break;
        }

        state.record_minor_cycle(outcome.iterations);
        trace!(
            "Minor cycle did {} iterations, stopping at {} Jy",
            outcome.iterations,
            outcome.max_residual
        );
        if outcome.increments.iter().all(Image::is_zero) {
            info!("The minor cycle found nothing more to clean");
            state.converged = true;
            break;
        }
        for (model, increment) in models.iter_mut().zip(outcome.increments.iter()) {
            *model = model.calc(increment, |m, i| m + i)?;
        }
        have_model = true;

        let scattered = models
            .iter()
            .map(|m| combiner.scatter_model(m, &sumwts[0]))
            .collect::<Result<Vec<_>, _>>()?;
        for a in &active {
            write_models(store.as_ref(), &worker_stem(imagename, a.worker), &scattered)?;
        }
    }
    state.enter(Stage::Done);
    info!(
        "Finished after {} major cycles ({} gridding passes) and {} iterations (converged: {})",
        state.minor_cycles, state.cycle, state.iterations, state.converged
    );

    // Restore each worker's share and combine them.
    let restored = restore(
        deconvolver,
        &combiner,
        store.as_ref(),
        imagename,
        &active,
        &models,
    )?;
    for t in 0..nterms {
        store.write(&ImageKind::Image.name(imagename, t, nterms), &restored[t])?;
        store.write(&ImageKind::Model.name(imagename, t, nterms), &models[t])?;
        store.write(&ImageKind::Residual.name(imagename, t, nterms), &residuals[t])?;
        store.write(&ImageKind::Sumwt.name(imagename, t, nterms), &sumwts[t])?;
    }
    for (t, psf) in psfs.iter().enumerate() {
        store.write(&ImageKind::Psf.name(imagename, t, nterms), psf)?;
    }
    store.write(&ImageKind::Mask.plain_name(imagename), &clean_mask)?;
    if nterms > 1 {
        let (alpha, beta) = spectral_index(&restored)?;
        store.write(&ImageKind::Alpha.plain_name(imagename), &alpha)?;
        if let Some(beta) = beta {
            store.write(&ImageKind::Beta.plain_name(imagename), &beta)?;
        }
    }

    let cleanup = active
        .iter()
        .map(|a| {
            (
                a.worker,
                partial_image_names(&worker_stem(imagename, a.worker), nterms, mosaic),
            )
        })
        .collect();
    clean_up(&mut pool, cleanup);
    pool.teardown();

    Ok(ImagingResult {
        iterations: state.iterations,
        max_residual: state.peak_residual,
        converged: state.converged,
        major_cycles: state.minor_cycles,
    })
}

/// Image a spectral cube, one chunk of channels per job.
pub fn cube(
    params: &CubeParams,
    dataset: &DatasetInfo,
    engine: Arc<dyn ImagingEngine>,
    store: Arc<dyn ImageStore>,
) -> Result<ImagingResult, ImagingError> {
    params.validate()?;
    let imaging = &params.imaging;
    let imagename = imaging.imagename.as_str();

    let spws = dataset.select_spws(params.spws.as_deref())?;
    let chunks = plan_cube_chunks(&params.cube_spec(), &spws)?;
    info!(
        "Imaging a {}-channel cube in {} chunks",
        imaging.grid.nchan,
        chunks.len()
    );

    let jobs: Vec<CubeJob> = chunks
        .iter()
        .map(|chunk| CubeJob {
            dataset: dataset.path.clone(),
            chunk: chunk.clone(),
            stem: worker_stem(imagename, chunk.index),
            grid: ImageGrid {
                nchan: chunk.nchan,
                freq_start: chunk.freq_start,
                ..imaging.grid
            },
            niter: imaging.niter,
            npercycle: imaging.npercycle,
            majorcycles: imaging.majorcycles,
            cyclefactor: imaging.cyclefactor,
            threshold: imaging.threshold,
            gain: imaging.gain,
            algorithm: imaging.algorithm,
            scales: imaging.scales.clone(),
            weighting: imaging.weighting,
            ftmachine: imaging.ftmachine,
            mask: imaging.mask.clone(),
        })
        .collect();

    let mut pool = WorkerPool::setup(
        &imaging.pool,
        engine,
        Arc::clone(&store),
        imaging.poll_interval,
    )?;

    // Hand chunks to free workers until there are none left.
    let progress = make_progress_bar(jobs.len(), "Imaging chunks");
    progress.tick();
    let mut queue: VecDeque<usize> = (0..jobs.len()).collect();
    let mut in_flight: Vec<(usize, JobHandle)> = vec![];
    let mut summaries: Vec<Option<CleanSummary>> = vec![None; jobs.len()];
    // The worker that imaged each chunk; it also cleans the chunk up.
    let mut ran_on: Vec<usize> = vec![0; jobs.len()];
    loop {
        while let (Some(&chunk), Some(worker)) = (queue.front(), pool.free_worker()) {
            queue.pop_front();
            trace!("Chunk {chunk} -> worker {worker}");
            let handle = pool.dispatch(worker, &Job::Cube(jobs[chunk].clone()))?;
            in_flight.push((chunk, handle));
        }

        let mut i = 0;
        while i < in_flight.len() {
            if !pool.poll(&mut in_flight[i].1) {
                i += 1;
                continue;
            }
            let (chunk, mut handle) = in_flight.swap_remove(i);
            let selection = || jobs[chunk].chunk.selection.iter().join(",");
            match handle.take_outcome() {
                Some(Ok(JobOutput::Clean(summary))) => {
                    summaries[chunk] = Some(summary);
                    ran_on[chunk] = handle.worker;
                }
                Some(Err(err)) => {
                    return Err(ImagingError::Partition {
                        partition: chunk,
                        dataset: dataset.path.display().to_string(),
                        selection: selection(),
                        err,
                    })
                }
                _ => {
                    return Err(EngineError::Failed(format!(
                        "chunk {chunk} ({}) didn't report how it went",
                        selection()
                    ))
                    .into())
                }
            }
            progress.inc(1);
        }

        if queue.is_empty() && in_flight.is_empty() {
            break;
        }
        thread::sleep(imaging.poll_interval);
    }
    progress.abandon_with_message("Imaging chunks: done");

    let summaries: Vec<CleanSummary> = summaries.into_iter().flatten().collect();
    let result = ImagingResult {
        iterations: summaries.iter().map(|s| s.iterations).max().unwrap_or(0),
        max_residual: summaries
            .iter()
            .map(|s| s.max_residual)
            .fold(0.0, f32::max),
        converged: summaries.iter().all(|s| s.converged),
        major_cycles: 0,
    };

    // Stitch the chunks together.
    for kind in [
        ImageKind::Image,
        ImageKind::Model,
        ImageKind::Residual,
        ImageKind::Psf,
    ] {
        let mut full = Image::zeros(imaging.grid);
        for job in &jobs {
            let part = store.read(&kind.plain_name(&job.stem))?;
            full.insert(&part, (job.chunk.start_chan, 0, 0));
        }
        store.write(&kind.plain_name(imagename), &full)?;
    }

    let cleanup = jobs
        .iter()
        .zip(ran_on)
        .map(|(job, worker)| {
            let names = [
                ImageKind::Image,
                ImageKind::Model,
                ImageKind::Residual,
                ImageKind::Psf,
            ]
            .into_iter()
            .map(|kind| kind.plain_name(&job.stem));
            (worker, names)
        })
        .into_group_map()
        .into_iter()
        .map(|(worker, names)| (worker, names.into_iter().flatten().collect()))
        .collect();
    clean_up(&mut pool, cleanup);
    pool.teardown();

    info!(
        "Cube done: up to {} iterations per chunk, max residual {} Jy (converged: {})",
        result.iterations, result.max_residual, result.converged
    );
    Ok(result)
}

/// Get the model to continue from, or get rid of old outputs.
fn prepare_outputs(
    params: &ContinuumParams,
    store: &dyn ImageStore,
) -> Result<Option<Vec<Image>>, ImagingError> {
    let imaging = &params.imaging;
    let imagename = imaging.imagename.as_str();
    let nterms = params.nterms;
    let model_names: Vec<String> = (0..nterms)
        .map(|t| ImageKind::Model.name(imagename, t, nterms))
        .collect();

    if params.contclean {
        if model_names.iter().all(|n| store.exists(n)) {
            info!("Continuing from the existing model '{}'", model_names[0]);
            let models = model_names
                .iter()
                .map(|n| {
                    let model = store.read(n)?;
                    if model.grid.same_as(&imaging.grid) {
                        Ok(model)
                    } else {
                        model.regrid_to(&imaging.grid)
                    }
                })
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Some(models));
        }
        debug!("No existing model; starting from scratch");
        return Ok(None);
    }

    let user_mask = imaging.mask.as_deref();
    for name in store.list(&format!("{imagename}."))? {
        let is_mask =
            name.ends_with(&format!(".{}", ImageKind::Mask)) || Some(name.as_str()) == user_mask;
        if !is_mask {
            debug!("Removing old image '{name}'");
            store.delete(&name)?;
        }
    }
    Ok(None)
}

fn write_models(store: &dyn ImageStore, stem: &str, models: &[Image]) -> Result<(), ImagingError> {
    let nterms = models.len();
    for (t, model) in models.iter().enumerate() {
        store.write(&ImageKind::Model.name(stem, t, nterms), model)?;
    }
    Ok(())
}

/// Attach the partition to any job failure.
fn check_outputs(
    outputs: Vec<Result<JobOutput, WorkerPoolError>>,
    active: &[&PartitionAssignment],
    dataset: &DatasetInfo,
) -> Result<(), ImagingError> {
    for (output, a) in outputs.into_iter().zip(active) {
        if let Err(err) = output {
            return Err(ImagingError::Partition {
                partition: a.worker,
                dataset: dataset.path.display().to_string(),
                selection: a.selection_string(),
                err,
            });
        }
    }
    Ok(())
}

/// Make every worker use the weight density of all the data.
fn exchange_weight_density(
    pool: &mut WorkerPool,
    active: &[&PartitionAssignment],
) -> Result<(), ImagingError> {
    debug!("Exchanging weight densities");
    let handles = active
        .iter()
        .map(|a| pool.dispatch(a.worker, &Job::WeightDensity))
        .collect::<Result<Vec<_>, _>>()?;
    for result in pool.wait_all(handles, "Weight density") {
        result?;
    }

    let mut total: Option<Array2<f32>> = None;
    for a in active {
        let WorkerValue::WeightGrid(grid) = pool.pull(a.worker, WEIGHT_GRID_VARIABLE)?;
        match total.as_mut() {
            None => total = Some(grid),
            Some(t) if t.dim() == grid.dim() => *t += &grid,
            Some(t) => {
                return Err(EngineError::Failed(format!(
                    "worker {} has a {:?} weight density, but others have {:?}",
                    a.worker,
                    grid.dim(),
                    t.dim()
                ))
                .into())
            }
        }
    }

    if let Some(density) = total {
        let job = Job::SetWeightDensity { density };
        let handles = active
            .iter()
            .map(|a| pool.dispatch(a.worker, &job))
            .collect::<Result<Vec<_>, _>>()?;
        for result in pool.wait_all(handles, "Weight density") {
            result?;
        }
    }
    Ok(())
}

/// Average the workers' flux and primary-beam coverage images, write them out
/// and return the coverage.
fn combine_coverage(
    combiner: &ImageCombiner,
    store: &dyn ImageStore,
    imagename: &str,
    active: &[&PartitionAssignment],
) -> Result<Image, ImagingError> {
    let read_all = |kind: ImageKind| -> Result<Vec<Image>, ImagingError> {
        active
            .iter()
            .map(|a| Ok(store.read(&kind.plain_name(&worker_stem(imagename, a.worker)))?))
            .collect()
    };
    let flux = combiner.average(&read_all(ImageKind::Flux)?)?;
    let coverage = combiner.average(&read_all(ImageKind::PbCoverage)?)?;
    store.write(&ImageKind::Flux.plain_name(imagename), &flux)?;
    store.write(&ImageKind::PbCoverage.plain_name(imagename), &coverage)?;
    Ok(coverage)
}

/// Restore the model against each worker's residuals and PSFs, and combine the
/// results weighted by each worker's sum of weights. One image per Taylor
/// term.
fn restore(
    deconvolver: &dyn Deconvolver,
    combiner: &ImageCombiner,
    store: &dyn ImageStore,
    imagename: &str,
    active: &[&PartitionAssignment],
    models: &[Image],
) -> Result<Vec<Image>, ImagingError> {
    let nterms = models.len();
    let grid = models[0].grid;
    let mut restored: Vec<Vec<Image>> = vec![vec![]; nterms];
    let mut weights: Vec<Vec<Image>> = vec![vec![]; nterms];
    for a in active {
        let partial =
            ImageSet::read(store, &worker_stem(imagename, a.worker), nterms)?.regrid_to(&grid)?;
        let images = deconvolver.restore(models, &partial.residuals, &partial.psfs)?;
        if images.len() != nterms {
            return Err(EngineError::Failed(format!(
                "restoring gave {} images, but {nterms} were expected",
                images.len()
            ))
            .into());
        }
        for (t, (image, sumwt)) in images.into_iter().zip(partial.sumwts).enumerate() {
            restored[t].push(image);
            weights[t].push(sumwt);
        }
    }

    restored
        .iter()
        .zip(weights.iter())
        .map(|(images, weights)| Ok(combiner.weighted_average(images, weights)?))
        .collect()
}

/// The names of the images a continuum job leaves behind.
fn partial_image_names(stem: &str, nterms: usize, mosaic: bool) -> Vec<String> {
    let mut names = vec![];
    for kind in [ImageKind::Model, ImageKind::Residual, ImageKind::Sumwt] {
        names.extend((0..nterms).map(|t| kind.name(stem, t, nterms)));
    }
    names.extend(
        (0..crate::combine::num_psf_terms(nterms)).map(|t| ImageKind::Psf.name(stem, t, nterms)),
    );
    if mosaic {
        names.push(ImageKind::Flux.plain_name(stem));
        names.push(ImageKind::PbCoverage.plain_name(stem));
    }
    names
}

/// Have workers delete images. Failing to clean up isn't fatal.
fn clean_up(pool: &mut WorkerPool, images: Vec<(usize, Vec<String>)>) {
    let mut handles = vec![];
    for (worker, images) in images {
        match pool.dispatch(worker, &Job::Cleanup { images }) {
            Ok(h) => handles.push(h),
            Err(e) => warn!("Couldn't clean up after worker {worker}: {e}"),
        }
    }
    for result in pool.wait_all(handles, "Cleaning up") {
        if let Err(e) = result {
            warn!("{e}");
        }
    }
}
