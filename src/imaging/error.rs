// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with imaging runs.

use thiserror::Error;

use crate::{
    combine::CombineError, engine::EngineError, image::ImageError, mask::MaskError,
    params::ParamsError, partition::PartitionError, pool::WorkerPoolError,
};

#[derive(Error, Debug)]
pub enum ImagingError {
    #[error("{num_partitions} partitions were requested, but there are only {num_workers} workers")]
    TooManyPartitions {
        num_partitions: usize,
        num_workers: usize,
    },

    #[error("Partition {partition} of '{dataset}' ({selection}) failed: {err}")]
    Partition {
        partition: usize,
        dataset: String,
        selection: String,
        err: WorkerPoolError,
    },

    /// This is not returned; the major-cycle loop stops instead.
    #[error("Major cycle {cycle}: the minor cycle diverged (peak residual {peak}); keeping the model from before it")]
    DeconvolveDivergence { cycle: u32, peak: f32 },

    #[error(transparent)]
    Params(#[from] ParamsError),

    #[error(transparent)]
    Planning(#[from] PartitionError),

    #[error(transparent)]
    Pool(#[from] WorkerPoolError),

    #[error(transparent)]
    Combine(#[from] CombineError),

    #[error(transparent)]
    Mask(#[from] MaskError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Image(#[from] ImageError),
}
