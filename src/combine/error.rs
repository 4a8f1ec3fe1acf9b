// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with combining partial images.

use thiserror::Error;

use crate::image::ImageError;

#[derive(Error, Debug)]
pub enum CombineError {
    #[error("No partial images were given to combine")]
    NoPartials,

    #[error("Partial image set {index} is on a grid that can't be regridded onto the first partial's grid: {err}")]
    GridMismatch { index: usize, err: ImageError },

    #[error("Partial image set {index} has {got} {kind} images, but {expected} were expected")]
    TermCount {
        index: usize,
        kind: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Got {images} images but {weights} weight images")]
    WeightCount { images: usize, weights: usize },

    #[error("Spectral indices need at least 2 Taylor-term images, but got {0}")]
    TooFewTerms(usize),

    #[error(transparent)]
    Image(#[from] ImageError),
}
