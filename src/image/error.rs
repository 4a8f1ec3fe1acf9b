// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with images and image stores.

use thiserror::Error;

use super::fits::FitsError;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Image data has shape {got:?}, but the grid expects {expected:?}")]
    ShapeMismatch {
        expected: (usize, usize, usize),
        got: (usize, usize, usize),
    },

    #[error("Images '{a}' and '{b}' are not on the same grid")]
    GridMismatch { a: String, b: String },

    #[error("Invalid image grid: {0}")]
    InvalidGrid(String),

    #[error("Image '{0}' doesn't exist")]
    NotFound(String),

    #[error(transparent)]
    Fits(#[from] FitsError),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
