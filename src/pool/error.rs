// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with the worker pool.

use std::path::PathBuf;

use thiserror::Error;

use crate::{engine::EngineError, image::ImageError};

#[derive(Error, Debug)]
pub enum WorkerPoolError {
    #[error("Cluster setup failed: {0}")]
    ClusterSetup(String),

    #[error("Cluster setup failed: scratch directory '{}' is not a directory", .0.display())]
    ScratchDir(PathBuf),

    #[error("There is no worker {worker}; the pool has {num_workers} workers")]
    NoSuchWorker { worker: usize, num_workers: usize },

    #[error("Worker {worker} is still busy with job {job_id}")]
    Busy { worker: usize, job_id: u64 },

    #[error("Worker {worker} has gone away (did it panic?)")]
    WorkerGone { worker: usize },

    #[error("Worker {worker} couldn't decode job: {err}")]
    Decode {
        worker: usize,
        err: serde_json::Error,
    },

    #[error("Couldn't encode a {job} job: {err}")]
    Encode {
        job: &'static str,
        err: serde_json::Error,
    },

    #[error("Worker {worker} failed its {job} job: {err}")]
    Job {
        worker: usize,
        job: &'static str,
        err: EngineError,
    },

    #[error("Worker {worker} has no variable '{name}'")]
    UnknownVariable { worker: usize, name: String },

    #[error("Worker {worker} couldn't clean up: {err}")]
    Cleanup { worker: usize, err: ImageError },

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
