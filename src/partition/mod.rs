// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Code to split the input visibilities into work assignments, one per worker.
//!
//! Three flavours of partitioning are available:
//!
//! * by channel ([`plan_channels`]), used for continuum imaging; each worker
//!   gets a contiguous piece of the (frequency-sorted) band;
//! * by cube chunk ([`plan_cube_chunks`]), used for spectral-line imaging;
//!   each chunk of output channels is an independent job;
//! * by time ([`plan_time`]), where each worker gets an equal slice of an
//!   observation's time span.

mod cube;
mod error;
mod time;

pub use cube::{plan_cube_chunks, CubeChunk, CubeSpec};
pub use error::PartitionError;
pub use time::{plan_time, ObservationSpan, TimeRange};

use std::{
    fmt::Display,
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use itertools::Itertools;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use vec1::Vec1;

use crate::constants::BANDWIDTH_PADDING;

/// A spectral window of the input dataset. This is read-only metadata;
/// nothing in this crate reads visibilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectralWindow {
    pub id: usize,

    /// The channel centre frequencies \[Hz\]. These may be ascending or
    /// descending.
    pub freqs: Vec1<f64>,
}

impl SpectralWindow {
    pub fn num_chans(&self) -> usize {
        self.freqs.len()
    }
}

/// Everything the planners need to know about a dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetInfo {
    /// The path to the visibilities. This is only ever handed to workers.
    pub path: PathBuf,

    pub spectral_windows: Vec<SpectralWindow>,

    /// Independent observations and their time spans. Only needed for time
    /// partitioning.
    #[serde(default)]
    pub observations: Vec<ObservationSpan>,
}

impl DatasetInfo {
    /// Read a dataset description from a toml or json file.
    pub fn read(file: &Path) -> Result<DatasetInfo, PartitionError> {
        debug!("Reading dataset description {}", file.display());
        let mut contents = String::new();
        File::open(file)?.read_to_string(&mut contents)?;
        let ext = file
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());
        let result = match ext.as_deref() {
            Some("toml") => toml::from_str(&contents).map_err(|e| e.to_string()),
            Some("json") => serde_json::from_str(&contents).map_err(|e| e.to_string()),
            _ => {
                return Err(PartitionError::DatasetFileType {
                    file: file.to_path_buf(),
                })
            }
        };
        result.map_err(|err| PartitionError::DatasetFileParse {
            file: file.to_path_buf(),
            err,
        })
    }

    /// Get the spectral windows with the given IDs, in the given order. If no
    /// IDs are given, all spectral windows are returned.
    pub fn select_spws(&self, ids: Option<&[usize]>) -> Result<Vec<SpectralWindow>, PartitionError> {
        match ids {
            None => Ok(self.spectral_windows.clone()),
            Some(ids) => ids
                .iter()
                .map(|&id| {
                    self.spectral_windows
                        .iter()
                        .find(|spw| spw.id == id)
                        .cloned()
                        .ok_or(PartitionError::MissingSpw(id))
                })
                .collect(),
        }
    }
}

/// A contiguous run of channels within a single spectral window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRange {
    pub spw: usize,
    pub start: usize,
    pub count: usize,
}

impl ChannelRange {
    /// One past the last channel.
    pub fn end(&self) -> usize {
        self.start + self.count
    }

    fn overlaps(&self, other: &ChannelRange) -> bool {
        self.spw == other.spw && self.start < other.end() && other.start < self.end()
    }

    /// Remove the channels in `claimed` from this range. The pieces below and
    /// above the claimed channels are returned, if they're not empty.
    fn subtract(&self, claimed: &ChannelRange) -> [Option<ChannelRange>; 2] {
        if !self.overlaps(claimed) {
            return [Some(*self), None];
        }
        let below = (self.start < claimed.start).then(|| ChannelRange {
            spw: self.spw,
            start: self.start,
            count: claimed.start - self.start,
        });
        let above = (self.end() > claimed.end()).then(|| ChannelRange {
            spw: self.spw,
            start: claimed.end(),
            count: self.end() - claimed.end(),
        });
        [below, above]
    }
}

impl Display for ChannelRange {
    /// Measurement-set style, e.g. "1:0~63".
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}~{}",
            self.spw,
            self.start,
            self.end().saturating_sub(1)
        )
    }
}

/// The data selection of one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "ranges", rename_all = "snake_case")]
pub enum Selection {
    Channels(Vec<ChannelRange>),
    Time(Vec<TimeRange>),
}

/// The work assigned to a single worker. Created once at plan time and never
/// modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionAssignment {
    pub worker: usize,
    pub selection: Selection,
}

impl PartitionAssignment {
    /// Empty assignments are legal (e.g. more workers than channels) and must
    /// not be dispatched.
    pub fn is_empty(&self) -> bool {
        match &self.selection {
            Selection::Channels(ranges) => ranges.iter().all(|r| r.count == 0),
            Selection::Time(ranges) => ranges.is_empty(),
        }
    }

    /// The number of channels in this assignment. Time assignments have no
    /// channel information and report 0.
    pub fn num_channels(&self) -> usize {
        match &self.selection {
            Selection::Channels(ranges) => ranges.iter().map(|r| r.count).sum(),
            Selection::Time(_) => 0,
        }
    }

    /// A measurement-set style selection string for this assignment.
    pub fn selection_string(&self) -> String {
        match &self.selection {
            Selection::Channels(ranges) => ranges.iter().join(","),
            Selection::Time(ranges) => ranges.iter().join(","),
        }
    }
}

/// The result of channel partitioning.
#[derive(Debug, Clone)]
pub struct ChannelPlan {
    /// Exactly one assignment per worker, in worker order.
    pub assignments: Vec1<PartitionAssignment>,

    /// The lowest and highest selected channel frequencies \[Hz\].
    pub freq_range: (f64, f64),
}

impl ChannelPlan {
    /// The centre of the selected band \[Hz\]. All workers image at this
    /// reference frequency.
    pub fn reference_freq(&self) -> f64 {
        let (lo, hi) = self.freq_range;
        lo + (hi - lo) / 2.0
    }

    /// The bandwidth handed to every worker \[Hz\].
    pub fn bandwidth(&self) -> f64 {
        (self.freq_range.1 - self.freq_range.0) * BANDWIDTH_PADDING
    }

    /// Every planned channel as the fewest possible ranges, grouped by
    /// spectral window in the order the windows first appear. Partitions that
    /// don't split the band by channel (e.g. time partitions) still need this
    /// to select the same data.
    pub fn band_selection(&self) -> Vec<ChannelRange> {
        let mut by_spw: IndexMap<usize, Vec<ChannelRange>> = IndexMap::new();
        for a in &self.assignments {
            if let Selection::Channels(ranges) = &a.selection {
                for r in ranges.iter().filter(|r| r.count > 0) {
                    by_spw.entry(r.spw).or_default().push(*r);
                }
            }
        }

        let mut merged = vec![];
        for (_, mut ranges) in by_spw {
            ranges.sort_unstable_by_key(|r| r.start);
            let mut current = ranges[0];
            for r in &ranges[1..] {
                if r.start <= current.end() {
                    current.count = current.end().max(r.end()) - current.start;
                } else {
                    merged.push(current);
                    current = *r;
                }
            }
            merged.push(current);
        }
        merged
    }
}

/// A single channel of the flattened, frequency-sorted band.
#[derive(Debug, Clone, Copy)]
struct FlatChannel {
    spw: usize,
    chan: usize,
    freq: f64,
}

/// Split `total` items over `num_partitions`; the first `total %
/// num_partitions` partitions get one extra.
pub(crate) fn partition_sizes(total: usize, num_partitions: usize) -> Vec<usize> {
    let base = total / num_partitions;
    let remainder = total % num_partitions;
    (0..num_partitions)
        .map(|i| if i < remainder { base + 1 } else { base })
        .collect()
}

fn freq_range_string(freq_range: Option<(f64, f64)>) -> String {
    match freq_range {
        Some((lo, hi)) => format!("{lo} Hz to {hi} Hz"),
        None => "unrestricted".to_string(),
    }
}

/// Flatten the spectral windows into single channels, keeping only those
/// inside `freq_range` (inclusive), and sort them by frequency. Each channel
/// keeps its spectral window and channel index, so the sort permutation is
/// never lost.
fn flatten_and_sort(spws: &[SpectralWindow], freq_range: Option<(f64, f64)>) -> Vec<FlatChannel> {
    let mut flat = spws
        .iter()
        .flat_map(|spw| {
            spw.freqs.iter().enumerate().map(|(chan, &freq)| FlatChannel {
                spw: spw.id,
                chan,
                freq,
            })
        })
        .filter(|c| match freq_range {
            Some((lo, hi)) => c.freq >= lo && c.freq <= hi,
            None => true,
        })
        .collect::<Vec<_>>();
    // A stable sort keeps the spw order for channels with equal frequencies.
    flat.sort_by(|a, b| a.freq.total_cmp(&b.freq));
    flat
}

/// Turn a run of frequency-sorted channels into channel ranges. No range
/// crosses a spectral window boundary, and ranges are listed in the order their
/// spectral windows first appear in the run.
fn run_to_ranges(run: &[FlatChannel]) -> Vec<ChannelRange> {
    let mut by_spw: IndexMap<usize, Vec<usize>> = IndexMap::new();
    for c in run {
        by_spw.entry(c.spw).or_default().push(c.chan);
    }

    let mut ranges = vec![];
    for (spw, mut chans) in by_spw {
        chans.sort_unstable();
        chans.dedup();
        let mut start = chans[0];
        let mut prev = chans[0];
        for &chan in &chans[1..] {
            if chan != prev + 1 {
                ranges.push(ChannelRange {
                    spw,
                    start,
                    count: prev - start + 1,
                });
                start = chan;
            }
            prev = chan;
        }
        ranges.push(ChannelRange {
            spw,
            start,
            count: prev - start + 1,
        });
    }
    ranges
}

/// Partition the channels of the given spectral windows over
/// `num_partitions` workers.
///
/// All channels (restricted to `freq_range`, if given) are sorted by frequency
/// and handed out in consecutive runs; the first `total % num_partitions`
/// workers get one extra channel. A run that crosses a spectral window
/// boundary is split so that no [`ChannelRange`] spans two windows.
///
/// If `continuum` is true, no `(spw, channel)` pair is given to more than one
/// worker; a later worker's ranges have any already-claimed channels removed.
/// This can leave assignments empty, which is fine; empty assignments are also
/// produced if there are more workers than channels.
pub fn plan_channels(
    spws: &[SpectralWindow],
    num_partitions: usize,
    freq_range: Option<(f64, f64)>,
    continuum: bool,
) -> Result<ChannelPlan, PartitionError> {
    if num_partitions == 0 {
        return Err(PartitionError::NoPartitions);
    }

    let flat = flatten_and_sort(spws, freq_range);
    if flat.is_empty() {
        return Err(PartitionError::EmptySelection {
            num_spws: spws.len(),
            freq_range: freq_range_string(freq_range),
        });
    }
    let total_num_chans = flat.len();
    debug!("Partitioning {total_num_chans} channels over {num_partitions} workers");

    let mut per_worker = Vec::with_capacity(num_partitions);
    let mut next = 0;
    for size in partition_sizes(total_num_chans, num_partitions) {
        let run = &flat[next..next + size];
        next += size;
        per_worker.push(if run.is_empty() {
            vec![]
        } else {
            run_to_ranges(run)
        });
    }

    if continuum {
        remove_claimed_channels(&mut per_worker);
    }

    let assignments = per_worker
        .into_iter()
        .enumerate()
        .map(|(worker, ranges)| {
            let a = PartitionAssignment {
                worker,
                selection: Selection::Channels(ranges),
            };
            trace!("Worker {worker}: '{}'", a.selection_string());
            a
        })
        .collect::<Vec<_>>();

    Ok(ChannelPlan {
        assignments: Vec1::try_from_vec(assignments).map_err(|_| PartitionError::NoPartitions)?,
        freq_range: (flat[0].freq, flat[total_num_chans - 1].freq),
    })
}

/// For every pair of workers (k, j) with k < j, remove from worker j any
/// channels that worker k already has. Ranges that become empty are dropped.
fn remove_claimed_channels(per_worker: &mut [Vec<ChannelRange>]) {
    for j in 1..per_worker.len() {
        let (earlier, later) = per_worker.split_at_mut(j);
        let later = &mut later[0];
        for claimed in earlier.iter().flatten() {
            if !later.iter().any(|r| r.overlaps(claimed)) {
                continue;
            }
            debug!("Removing already-claimed channels {claimed} from worker {j}");
            *later = later
                .iter()
                .flat_map(|r| r.subtract(claimed))
                .flatten()
                .filter(|r| r.count > 0)
                .collect();
        }
    }
}
