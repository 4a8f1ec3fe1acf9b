// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Partitioning of output cube channels into independently-imaged chunks.

use log::debug;
use serde::{Deserialize, Serialize};
use vec1::Vec1;

use super::{flatten_and_sort, run_to_ranges, ChannelRange, PartitionError, SpectralWindow};

/// The spectral layout of an output cube.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CubeSpec {
    /// The total number of output channels.
    pub nchan: usize,

    /// The maximum number of output channels per chunk.
    pub chanchunk: usize,

    /// The centre frequency of the first output channel \[Hz\].
    pub freq_start: f64,

    /// The output channel width \[Hz\]. May be negative.
    pub freq_step: f64,
}

/// A contiguous block of output cube channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CubeChunk {
    pub index: usize,

    /// The first output channel of this chunk in the full cube.
    pub start_chan: usize,

    pub nchan: usize,

    /// The centre frequency of the first channel of this chunk \[Hz\].
    pub freq_start: f64,

    /// \[Hz\]
    pub freq_width: f64,

    /// The input channels that fall inside this chunk's band. This can be
    /// empty if the cube extends past the data.
    pub selection: Vec<ChannelRange>,
}

impl CubeChunk {
    /// The lower and upper edges of this chunk's band \[Hz\].
    pub fn band_edges(&self) -> (f64, f64) {
        let a = self.freq_start - self.freq_width / 2.0;
        let b = self.freq_start + (self.nchan as f64 - 0.5) * self.freq_width;
        (a.min(b), a.max(b))
    }
}

/// Split a cube of `spec.nchan` channels into `ceil(nchan / chanchunk)`
/// chunks. All chunks have `chanchunk` channels except possibly the last,
/// which has the remainder.
pub fn plan_cube_chunks(
    spec: &CubeSpec,
    spws: &[SpectralWindow],
) -> Result<Vec1<CubeChunk>, PartitionError> {
    if spec.nchan == 0 {
        return Err(PartitionError::EmptySelection {
            num_spws: spws.len(),
            freq_range: "an empty cube".to_string(),
        });
    }
    if spec.chanchunk == 0 {
        return Err(PartitionError::ZeroChanChunk);
    }
    if !spec.freq_step.is_finite() || spec.freq_step == 0.0 {
        return Err(PartitionError::InvalidChannelWidth(spec.freq_step));
    }

    let num_chunks = spec.nchan.div_ceil(spec.chanchunk);
    debug!(
        "Splitting {} cube channels into {num_chunks} chunks of up to {} channels",
        spec.nchan, spec.chanchunk
    );
    let all_chans = flatten_and_sort(spws, None);

    let chunks = (0..num_chunks)
        .map(|index| {
            let start_chan = index * spec.chanchunk;
            let nchan = spec.chanchunk.min(spec.nchan - start_chan);
            let mut chunk = CubeChunk {
                index,
                start_chan,
                nchan,
                freq_start: spec.freq_start + start_chan as f64 * spec.freq_step,
                freq_width: spec.freq_step,
                selection: vec![],
            };
            let (lo, hi) = chunk.band_edges();
            let in_band = all_chans
                .iter()
                .filter(|c| c.freq >= lo && c.freq < hi)
                .copied()
                .collect::<Vec<_>>();
            if !in_band.is_empty() {
                chunk.selection = run_to_ranges(&in_band);
            }
            chunk
        })
        .collect::<Vec<_>>();

    Vec1::try_from_vec(chunks).map_err(|_| PartitionError::ZeroChanChunk)
}
