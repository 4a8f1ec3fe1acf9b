// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with imaging parameters.

use thiserror::Error;

use crate::image::ImageError;

#[derive(Error, Debug)]
pub enum ParamsError {
    #[error("No image name was given")]
    NoImageName,

    #[error("The loop gain must be in (0, 1]; got {0}")]
    Gain(f64),

    #[error("The cycle factor must be positive; got {0}")]
    CycleFactor(f64),

    #[error("The threshold must not be negative; got {0} Jy")]
    Threshold(f64),

    #[error("The primary-beam limit must be in [0, 1); got {0}")]
    PbLimit(f64),

    #[error("The multiscale algorithm needs at least one scale")]
    NoScales,

    #[error("At least one worker is needed")]
    NoWorkers,

    #[error("The number of Taylor terms must be at least 1")]
    NoTaylorTerms,

    #[error("The mtmfs algorithm needs at least 2 Taylor terms")]
    MtmfsNeedsTerms,

    #[error("Continuum images have a single channel, but the grid has {0}")]
    ContinuumChannels(usize),

    #[error("The frequency range {lo} Hz to {hi} Hz is backwards")]
    FreqRange { lo: f64, hi: f64 },

    #[error("The number of channels per cube chunk must be at least 1")]
    ZeroChanChunk,

    #[error(transparent)]
    Image(#[from] ImageError),
}
