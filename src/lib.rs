// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Partitioned, multi-worker imaging for radio interferometric data.

The visibility data are split by frequency (or time) across a pool of workers.
Each worker grids and transforms its share, the partial PSFs, residuals and
weights are combined, a minor cycle deconvolves the combined residual, and the
updated model is pushed back to every worker for the next major cycle.
 */

pub mod cli;
pub mod combine;
pub mod constants;
pub mod engine;
pub mod image;
pub mod imaging;
pub mod mask;
pub mod params;
pub mod partition;
pub mod pool;
pub mod unit_parsing;

#[cfg(test)]
mod tests;

use crossbeam_utils::atomic::AtomicCell;

lazy_static::lazy_static! {
    /// Are progress bars being drawn? This should only ever be enabled by CLI
    /// code.
    pub(crate) static ref PROGRESS_BARS: AtomicCell<bool> = AtomicCell::new(false);
}

// Re-exports.
pub use cli::{Hyperimager, HyperimagerError};
pub use combine::{ImageCombiner, ImageSet};
pub use engine::{Deconvolver, ImagingEngine};
pub use image::{Image, ImageGrid, ImageStore};
pub use imaging::{continuum, cube, ImagingResult};
pub use partition::{DatasetInfo, PartitionAssignment, SpectralWindow};
pub use pool::WorkerPool;
