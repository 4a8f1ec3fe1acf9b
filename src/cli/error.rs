// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type for all hyperimager-related errors. This should be the *only*
//! error enum that is publicly visible from the CLI.

use thiserror::Error;

use super::{combine::CombineArgsError, mask::MakeMaskArgsError, plan::PlanArgsError};
use crate::{
    combine::CombineError, image::ImageError, imaging::ImagingError, mask::MaskError,
    params::ParamsError, partition::PartitionError, unit_parsing::UnitParseError,
};

/// The *only* publicly visible error from the hyperimager CLI. Inner errors
/// are flattened into strings so that callers don't need to know about every
/// module's error type.
#[derive(Error, Debug)]
pub enum HyperimagerError {
    /// An error related to partition planning.
    #[error("{0}")]
    Plan(String),

    /// An error related to combining partial images.
    #[error("{0}")]
    Combine(String),

    /// An error related to clean masks.
    #[error("{0}")]
    Mask(String),

    /// An error related to imaging runs.
    #[error("{0}")]
    Imaging(String),

    /// An error related to reading or writing images.
    #[error("{0}")]
    Image(String),

    /// An error related to argument files.
    #[error("{0}")]
    ArgFile(String),

    /// A generic error that can't be clarified further with documentation,
    /// e.g. IO errors.
    #[error("{0}")]
    Generic(String),
}

impl From<PlanArgsError> for HyperimagerError {
    fn from(e: PlanArgsError) -> Self {
        Self::Plan(e.to_string())
    }
}

impl From<CombineArgsError> for HyperimagerError {
    fn from(e: CombineArgsError) -> Self {
        Self::Combine(e.to_string())
    }
}

impl From<MakeMaskArgsError> for HyperimagerError {
    fn from(e: MakeMaskArgsError) -> Self {
        Self::Mask(e.to_string())
    }
}

impl From<PartitionError> for HyperimagerError {
    fn from(e: PartitionError) -> Self {
        match e {
            PartitionError::IO(e) => Self::from(e),
            _ => Self::Plan(e.to_string()),
        }
    }
}

impl From<CombineError> for HyperimagerError {
    fn from(e: CombineError) -> Self {
        match e {
            CombineError::Image(e) => Self::from(e),
            _ => Self::Combine(e.to_string()),
        }
    }
}

impl From<MaskError> for HyperimagerError {
    fn from(e: MaskError) -> Self {
        Self::Mask(e.to_string())
    }
}

impl From<ImageError> for HyperimagerError {
    fn from(e: ImageError) -> Self {
        match e {
            ImageError::IO(e) => Self::from(e),
            _ => Self::Image(e.to_string()),
        }
    }
}

impl From<ImagingError> for HyperimagerError {
    fn from(e: ImagingError) -> Self {
        match e {
            ImagingError::Planning(e) => Self::from(e),
            ImagingError::Combine(e) => Self::from(e),
            ImagingError::Mask(e) => Self::from(e),
            ImagingError::Image(e) => Self::from(e),
            _ => Self::Imaging(e.to_string()),
        }
    }
}

impl From<ParamsError> for HyperimagerError {
    fn from(e: ParamsError) -> Self {
        Self::Imaging(e.to_string())
    }
}

impl From<UnitParseError> for HyperimagerError {
    fn from(e: UnitParseError) -> Self {
        Self::Generic(e.to_string())
    }
}

impl From<std::io::Error> for HyperimagerError {
    fn from(e: std::io::Error) -> Self {
        Self::Generic(e.to_string())
    }
}
