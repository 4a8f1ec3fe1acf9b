// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with partitioning visibility data over workers.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PartitionError {
    #[error("No channels or times matched the selection ({num_spws} spectral windows, frequency range {freq_range})")]
    EmptySelection { num_spws: usize, freq_range: String },

    #[error("Cannot partition data over zero workers")]
    NoPartitions,

    #[error("There are {groups} observation groups but only {partitions} partitions; every group needs at least one worker")]
    TooFewPartitions { groups: usize, partitions: usize },

    #[error("The number of channels per cube chunk must be at least 1")]
    ZeroChanChunk,

    #[error("The cube channel width must be finite and non-zero; got {0} Hz")]
    InvalidChannelWidth(f64),

    #[error("Observation group {id} ends ({end}) before it starts ({start})")]
    BackwardsTimeRange { id: usize, start: String, end: String },

    #[error("Spectral window {0} was selected but isn't in the dataset")]
    MissingSpw(usize),

    #[error("Dataset description {} has an unsupported extension; use toml or json", file.display())]
    DatasetFileType { file: PathBuf },

    #[error("Couldn't decode dataset description {}: {err}", file.display())]
    DatasetFileParse { file: PathBuf, err: String },

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
