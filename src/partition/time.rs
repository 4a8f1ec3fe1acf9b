// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Partitioning by time.

use std::fmt::Display;

use hifitime::{Duration, Epoch};
use log::debug;
use serde::{Deserialize, Serialize};
use vec1::Vec1;

use super::{partition_sizes, PartitionAssignment, PartitionError, Selection};

/// The time span of an independent observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObservationSpan {
    pub id: usize,

    /// \[GPS seconds\]
    pub start_gps: f64,

    /// \[GPS seconds\]
    pub end_gps: f64,
}

impl ObservationSpan {
    pub fn start(&self) -> Epoch {
        Epoch::from_gpst_seconds(self.start_gps)
    }

    pub fn end(&self) -> Epoch {
        Epoch::from_gpst_seconds(self.end_gps)
    }

    fn duration(&self) -> Duration {
        self.end() - self.start()
    }
}

/// A time interval belonging to a single observation group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub group: usize,

    /// \[GPS seconds\]
    pub start_gps: f64,

    /// \[GPS seconds\]
    pub end_gps: f64,
}

impl TimeRange {
    pub fn start(&self) -> Epoch {
        Epoch::from_gpst_seconds(self.start_gps)
    }

    pub fn end(&self) -> Epoch {
        Epoch::from_gpst_seconds(self.end_gps)
    }

    pub fn iso_start(&self) -> String {
        iso_string(self.start())
    }

    pub fn iso_end(&self) -> String {
        iso_string(self.end())
    }
}

impl Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}~{}", self.iso_start(), self.iso_end())
    }
}

/// Format an epoch as "YYYY-MM-DDThh:mm:ss.sss" (UTC).
fn iso_string(e: Epoch) -> String {
    let (y, mo, d, h, mi, s, ns) = e.to_gregorian_utc();
    // Round to the millisecond, carrying into the seconds if necessary.
    let ms = (f64::from(ns) / 1e6).round() as u32;
    let (s, ms) = if ms >= 1000 { (s + 1, ms - 1000) } else { (s, ms) };
    format!("{y:04}-{mo:02}-{d:02}T{h:02}:{mi:02}:{s:02}.{ms:03}")
}

/// Split the given observations' time spans over `num_partitions` workers,
/// each worker getting exactly one interval.
///
/// Every observation gets at least one worker. The remaining workers are
/// handed out in proportion to each observation's duration (largest remainder
/// first). Each observation's span is then divided into equal-length
/// intervals.
pub fn plan_time(
    spans: &[ObservationSpan],
    num_partitions: usize,
) -> Result<Vec1<PartitionAssignment>, PartitionError> {
    if num_partitions == 0 {
        return Err(PartitionError::NoPartitions);
    }
    if spans.is_empty() {
        return Err(PartitionError::EmptySelection {
            num_spws: 0,
            freq_range: "unrestricted".to_string(),
        });
    }
    for span in spans {
        if span.end_gps < span.start_gps {
            return Err(PartitionError::BackwardsTimeRange {
                id: span.id,
                start: iso_string(span.start()),
                end: iso_string(span.end()),
            });
        }
    }
    if spans.len() > num_partitions {
        return Err(PartitionError::TooFewPartitions {
            groups: spans.len(),
            partitions: num_partitions,
        });
    }

    let per_group = allocate_workers(spans, num_partitions);
    debug!("Workers per observation group: {per_group:?}");

    let mut assignments = Vec::with_capacity(num_partitions);
    for (span, &n) in spans.iter().zip(per_group.iter()) {
        let start = span.start();
        let total_ns = span.duration().total_nanoseconds();
        let step = total_ns / n as i128;
        for i in 0..n {
            let lo = start + Duration::from_total_nanoseconds(step * i as i128);
            // The last interval always ends exactly at the end of the span.
            let end_gps = if i + 1 == n {
                span.end_gps
            } else {
                (lo + Duration::from_total_nanoseconds(step)).to_gpst_seconds()
            };
            assignments.push(PartitionAssignment {
                worker: assignments.len(),
                selection: Selection::Time(vec![TimeRange {
                    group: span.id,
                    start_gps: lo.to_gpst_seconds(),
                    end_gps,
                }]),
            });
        }
    }

    Vec1::try_from_vec(assignments).map_err(|_| PartitionError::NoPartitions)
}

/// How many workers each observation group gets. The result sums to
/// `num_partitions`, and every group gets at least one.
fn allocate_workers(spans: &[ObservationSpan], num_partitions: usize) -> Vec<usize> {
    let mut per_group = vec![1; spans.len()];
    let spare = num_partitions - spans.len();
    if spare == 0 {
        return per_group;
    }

    let durations = spans
        .iter()
        .map(|s| s.duration().to_seconds())
        .collect::<Vec<_>>();
    let total: f64 = durations.iter().sum();
    if total <= 0.0 {
        // All spans are instantaneous; share the spare workers evenly.
        for (n, extra) in per_group
            .iter_mut()
            .zip(partition_sizes(spare, spans.len()))
        {
            *n += extra;
        }
        return per_group;
    }

    let quotas = durations
        .iter()
        .map(|d| d / total * spare as f64)
        .collect::<Vec<_>>();
    let mut handed_out = 0;
    for (n, q) in per_group.iter_mut().zip(quotas.iter()) {
        let whole = q.floor() as usize;
        *n += whole;
        handed_out += whole;
    }
    // Largest remainders get the leftovers; ties go to the earlier group.
    let mut order = (0..spans.len()).collect::<Vec<_>>();
    order.sort_by(|&a, &b| {
        let ra = quotas[a] - quotas[a].floor();
        let rb = quotas[b] - quotas[b].floor();
        rb.total_cmp(&ra).then(a.cmp(&b))
    });
    for &i in order.iter().take(spare - handed_out) {
        per_group[i] += 1;
    }
    per_group
}
