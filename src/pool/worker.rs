// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The body of a worker thread.

use std::{path::PathBuf, sync::Arc};

use crossbeam_channel::{Receiver, Sender};
use crossbeam_utils::atomic::AtomicCell;
use indexmap::IndexMap;
use log::{debug, trace};
use scopeguard::defer_on_unwind;

use super::{job::*, WorkerPoolError, WorkerState};
use crate::{
    engine::{ImagingEngine, JobContext},
    image::ImageStore,
};

/// A serialised job, and where to send its result.
pub(super) struct Envelope {
    pub(super) job_id: u64,
    pub(super) payload: String,
    pub(super) reply: Sender<Result<JobOutput, WorkerPoolError>>,
}

pub(super) struct Worker {
    pub(super) index: usize,
    pub(super) host: String,
    pub(super) scratch_dir: PathBuf,
    pub(super) engine: Arc<dyn ImagingEngine>,
    pub(super) store: Arc<dyn ImageStore>,

    /// Values kept between jobs, retrievable with [`Job::Pull`].
    pub(super) variables: IndexMap<String, WorkerValue>,
}

impl Worker {
    /// Run jobs until the pool hangs up.
    pub(super) fn run(mut self, rx: Receiver<Envelope>, state: Arc<AtomicCell<WorkerState>>) {
        // If a job panics, the pool needs to know this worker is gone.
        defer_on_unwind! { state.store(WorkerState::Failed); }

        for envelope in rx.iter() {
            trace!("Worker {} received job {}", self.index, envelope.job_id);
            let result = serde_json::from_str::<Job>(&envelope.payload)
                .map_err(|err| WorkerPoolError::Decode {
                    worker: self.index,
                    err,
                })
                .and_then(|job| self.execute(job));
            state.store(WorkerState::Ready);
            // Nobody may be waiting for this result anymore; that's fine.
            let _ = envelope.reply.send(result);
        }

        debug!("Worker {} on {} shutting down", self.index, self.host);
    }

    fn execute(&mut self, job: Job) -> Result<JobOutput, WorkerPoolError> {
        let worker = self.index;
        let job_name = job.name();
        let job_err = |err| WorkerPoolError::Job {
            worker,
            job: job_name,
            err,
        };
        let ctx = JobContext {
            worker,
            host: &self.host,
            scratch_dir: &self.scratch_dir,
            store: self.store.as_ref(),
        };

        let output = match job {
            Job::Continuum(job) => {
                let summary = self
                    .engine
                    .make_partial_images(&ctx, &job)
                    .map_err(job_err)?;
                JobOutput::Partial(summary)
            }

            Job::Cube(job) => {
                let summary = self.engine.image_cube_chunk(&ctx, &job).map_err(job_err)?;
                JobOutput::Clean(summary)
            }

            Job::Cleanup { images } => {
                for image in &images {
                    self.store
                        .delete(image)
                        .map_err(|err| WorkerPoolError::Cleanup { worker, err })?;
                }
                JobOutput::Done
            }

            Job::WeightDensity => {
                let density = self.engine.weight_density(&ctx).map_err(job_err)?;
                self.variables.insert(
                    WEIGHT_GRID_VARIABLE.to_string(),
                    WorkerValue::WeightGrid(density),
                );
                JobOutput::Done
            }

            Job::SetWeightDensity { density } => {
                self.engine
                    .set_weight_density(&ctx, &density)
                    .map_err(job_err)?;
                JobOutput::Done
            }

            Job::Pull { name } => match self.variables.get(&name) {
                Some(value) => JobOutput::Value(value.clone()),
                None => return Err(WorkerPoolError::UnknownVariable { worker, name }),
            },
        };
        Ok(output)
    }
}
