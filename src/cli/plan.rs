// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Show (and optionally save) how a dataset would be split over workers.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::PathBuf,
    str::FromStr,
};

use clap::Parser;
use itertools::Itertools;
use log::{debug, info, trace};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use vec1::Vec1;

use super::common::{
    display_warnings, parse_freq_range, ArgFileTypes, InfoPrinter, Warn, ARG_FILE_HELP,
};
use crate::{
    partition::{
        plan_channels, plan_cube_chunks, plan_time, CubeChunk, CubeSpec, DatasetInfo,
        PartitionAssignment,
    },
    unit_parsing::parse_freq_hz,
    HyperimagerError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub(super) enum PlanMode {
    Channel,
    Time,
    Cube,
}

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct PlanArgs {
    #[clap(name = "ARGUMENTS_FILE", help = ARG_FILE_HELP.as_str(), parse(from_os_str))]
    pub(super) args_file: Option<PathBuf>,

    /// A toml or json file describing the dataset's spectral windows and (for
    /// time partitioning) its observations.
    #[clap(short, long, parse(from_os_str), help_heading = "INPUT DATA")]
    pub(super) dataset: Option<PathBuf>,

    /// How to split the data: "channel", "time" or "cube". Default: channel
    #[clap(short, long, help_heading = "PARTITIONING")]
    pub(super) mode: Option<String>,

    /// The number of partitions (workers). Not used for cube chunking.
    /// Default: 1
    #[clap(short, long, help_heading = "PARTITIONING")]
    pub(super) num_partitions: Option<usize>,

    /// The IDs of the spectral windows to use. Default: all of them
    #[clap(long, multiple_values(true), help_heading = "PARTITIONING")]
    pub(super) spws: Option<Vec<usize>>,

    /// Only use channels at or above this frequency (e.g. 150MHz). Bare
    /// numbers are Hz.
    #[clap(long, help_heading = "PARTITIONING")]
    pub(super) begin_freq: Option<String>,

    /// Only use channels at or below this frequency (e.g. 180MHz). Bare
    /// numbers are Hz.
    #[clap(long, help_heading = "PARTITIONING")]
    pub(super) end_freq: Option<String>,

    /// Allow the same channel to be given to more than one partition. This is
    /// never done for continuum imaging.
    #[clap(long, help_heading = "PARTITIONING")]
    #[serde(default)]
    pub(super) allow_duplicates: bool,

    /// The number of output cube channels.
    #[clap(long, help_heading = "CUBE")]
    pub(super) nchan: Option<usize>,

    /// The maximum number of output channels imaged by a single job.
    #[clap(long, help_heading = "CUBE")]
    pub(super) chanchunk: Option<usize>,

    /// The frequency of the first output cube channel (e.g. 150MHz).
    /// Default: the lowest dataset frequency
    #[clap(long, help_heading = "CUBE")]
    pub(super) start_freq: Option<String>,

    /// The width of the output cube channels (e.g. 1MHz). May be negative.
    #[clap(long, allow_hyphen_values = true, help_heading = "CUBE")]
    pub(super) chan_width: Option<String>,

    /// Write the plan to this file. Supported formats: toml, json
    #[clap(short, long, parse(from_os_str), help_heading = "OUTPUT FILES")]
    pub(super) output: Option<PathBuf>,
}

/// What gets planned.
#[derive(Debug)]
enum PlanKind {
    Channels {
        num_partitions: usize,
        freq_range: Option<(f64, f64)>,
        continuum: bool,
    },
    Time {
        num_partitions: usize,
    },
    Cube(CubeSpec),
}

#[derive(Debug)]
pub(super) struct PlanParams {
    dataset: DatasetInfo,
    spws: Option<Vec<usize>>,
    kind: PlanKind,
    output: Option<PathBuf>,
}

/// A plan, as written to disk.
#[derive(Debug, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
enum PlanFile {
    Channel {
        reference_freq: f64,
        bandwidth: f64,
        freq_range: (f64, f64),
        assignments: Vec<PlanEntry>,
    },
    Time {
        assignments: Vec<PlanEntry>,
    },
    Cube {
        chunks: Vec<CubeChunk>,
    },
}

#[derive(Debug, Serialize)]
struct PlanEntry {
    worker: usize,
    selection: String,
}

impl PlanArgs {
    /// Both command-line and file arguments overlap in terms of what is
    /// available; this function consolidates everything that was specified into
    /// a single struct. Where applicable, it will prefer CLI parameters over
    /// those in the file.
    pub(super) fn merge(self) -> Result<PlanArgs, HyperimagerError> {
        debug!("Merging command-line arguments with the argument file");

        let cli_args = self;

        if let Some(arg_file) = cli_args.args_file {
            let PlanArgs {
                args_file: _,
                dataset,
                mode,
                num_partitions,
                spws,
                begin_freq,
                end_freq,
                allow_duplicates,
                nchan,
                chanchunk,
                start_freq,
                chan_width,
                output,
            } = unpack_arg_file!(arg_file);

            Ok(PlanArgs {
                args_file: None,
                dataset: cli_args.dataset.or(dataset),
                mode: cli_args.mode.or(mode),
                num_partitions: cli_args.num_partitions.or(num_partitions),
                spws: cli_args.spws.or(spws),
                begin_freq: cli_args.begin_freq.or(begin_freq),
                end_freq: cli_args.end_freq.or(end_freq),
                allow_duplicates: cli_args.allow_duplicates || allow_duplicates,
                nchan: cli_args.nchan.or(nchan),
                chanchunk: cli_args.chanchunk.or(chanchunk),
                start_freq: cli_args.start_freq.or(start_freq),
                chan_width: cli_args.chan_width.or(chan_width),
                output: cli_args.output.or(output),
            })
        } else {
            Ok(cli_args)
        }
    }

    pub(super) fn parse(self) -> Result<PlanParams, HyperimagerError> {
        debug!("{:#?}", self);

        let PlanArgs {
            args_file: _,
            dataset,
            mode,
            num_partitions,
            spws,
            begin_freq,
            end_freq,
            allow_duplicates,
            nchan,
            chanchunk,
            start_freq,
            chan_width,
            output,
        } = self;

        let dataset_file = dataset.ok_or(PlanArgsError::NoDataset)?;
        let dataset = DatasetInfo::read(&dataset_file)?;
        let mode = match mode {
            None => PlanMode::Channel,
            Some(m) => PlanMode::from_str(&m.to_lowercase())
                .map_err(|_| PlanArgsError::UnknownMode(m))?,
        };
        if let Some(output) = output.as_ref() {
            if ArgFileTypes::from_path(output).is_none() {
                return Err(PlanArgsError::OutputType(output.clone()).into());
            }
        }

        let kind = match mode {
            PlanMode::Channel => {
                let num_partitions = num_partitions.unwrap_or(1);
                if num_partitions == 0 {
                    return Err(PlanArgsError::ZeroPartitions.into());
                }
                PlanKind::Channels {
                    num_partitions,
                    freq_range: parse_freq_range(begin_freq.as_deref(), end_freq.as_deref())?,
                    continuum: !allow_duplicates,
                }
            }

            PlanMode::Time => {
                let num_partitions = num_partitions.unwrap_or(1);
                if num_partitions == 0 {
                    return Err(PlanArgsError::ZeroPartitions.into());
                }
                if begin_freq.is_some() || end_freq.is_some() {
                    "Frequency limits are ignored when partitioning by time".warn();
                }
                PlanKind::Time { num_partitions }
            }

            PlanMode::Cube => {
                let nchan = nchan.ok_or(PlanArgsError::CubeNeeds("nchan"))?;
                let chanchunk = chanchunk.ok_or(PlanArgsError::CubeNeeds("chanchunk"))?;
                let freq_step = chan_width
                    .as_deref()
                    .map(parse_freq_hz)
                    .transpose()?
                    .ok_or(PlanArgsError::CubeNeeds("chan-width"))?;
                let freq_start = match start_freq.as_deref() {
                    Some(s) => parse_freq_hz(s)?,
                    None => lowest_freq(&dataset).ok_or(PlanArgsError::NoChannels)?,
                };
                if num_partitions.is_some() {
                    "The number of partitions is ignored for cube chunking".warn();
                }
                PlanKind::Cube(CubeSpec {
                    nchan,
                    chanchunk,
                    freq_start,
                    freq_step,
                })
            }
        };

        display_warnings();

        Ok(PlanParams {
            dataset,
            spws,
            kind,
            output,
        })
    }

    pub(super) fn run(self, dry_run: bool) -> Result<(), HyperimagerError> {
        debug!("Converting arguments into parameters");
        trace!("{:#?}", self);
        let params = self.parse()?;

        if dry_run {
            info!("Dry run -- exiting now.");
            return Ok(());
        }

        params.run()
    }
}

impl PlanParams {
    fn run(self) -> Result<(), HyperimagerError> {
        let PlanParams {
            dataset,
            spws,
            kind,
            output,
        } = self;
        let spws = dataset.select_spws(spws.as_deref())?;

        let plan = match kind {
            PlanKind::Channels {
                num_partitions,
                freq_range,
                continuum,
            } => {
                let plan = plan_channels(&spws, num_partitions, freq_range, continuum)?;
                PlanFile::Channel {
                    reference_freq: plan.reference_freq(),
                    bandwidth: plan.bandwidth(),
                    freq_range: plan.freq_range,
                    assignments: entries(&plan.assignments),
                }
            }

            PlanKind::Time { num_partitions } => {
                let assignments = plan_time(&dataset.observations, num_partitions)?;
                PlanFile::Time {
                    assignments: entries(&assignments),
                }
            }

            PlanKind::Cube(spec) => {
                let chunks = plan_cube_chunks(&spec, &spws)?;
                PlanFile::Cube {
                    chunks: chunks.into_vec(),
                }
            }
        };

        plan.display();

        if let Some(output) = output {
            let contents = match ArgFileTypes::from_path(&output) {
                Some(ArgFileTypes::Toml) => toml::to_string(&plan)
                    .map_err(|e| HyperimagerError::Generic(e.to_string()))?,
                Some(ArgFileTypes::Json) => serde_json::to_string_pretty(&plan)
                    .map_err(|e| HyperimagerError::Generic(e.to_string()))?,
                None => return Err(PlanArgsError::OutputType(output).into()),
            };
            let mut f = BufWriter::new(File::create(&output)?);
            f.write_all(contents.as_bytes())?;
            f.flush()?;
            info!("Wrote plan to {}", output.display());
        }

        Ok(())
    }
}

impl PlanFile {
    fn display(&self) {
        let mut printer = InfoPrinter::new("Partition plan".into());
        match self {
            PlanFile::Channel {
                reference_freq,
                bandwidth,
                freq_range: (lo, hi),
                assignments,
            } => {
                printer.push_block(vec![
                    format!(
                        "Selected band: {:.4} MHz to {:.4} MHz",
                        lo / 1e6,
                        hi / 1e6
                    )
                    .into(),
                    format!("Reference frequency: {:.4} MHz", reference_freq / 1e6).into(),
                    format!("Bandwidth: {:.4} MHz", bandwidth / 1e6).into(),
                ]);
                push_entries(&mut printer, assignments);
            }

            PlanFile::Time { assignments } => push_entries(&mut printer, assignments),

            PlanFile::Cube { chunks } => {
                printer.push_block(
                    chunks
                        .iter()
                        .map(|c| {
                            format!(
                                "Chunk {}: channels {}~{}, input '{}'",
                                c.index,
                                c.start_chan,
                                c.start_chan + c.nchan - 1,
                                c.selection.iter().join(",")
                            )
                            .into()
                        })
                        .collect(),
                );
            }
        }
        printer.display();

        if let PlanFile::Channel { assignments, .. } | PlanFile::Time { assignments } = self {
            for entry in assignments.iter().filter(|e| e.selection.is_empty()) {
                format!("Worker {} has no data and won't be given any jobs", entry.worker).warn();
            }
        }
        display_warnings();
    }
}

fn entries(assignments: &Vec1<PartitionAssignment>) -> Vec<PlanEntry> {
    assignments
        .iter()
        .map(|a| PlanEntry {
            worker: a.worker,
            selection: a.selection_string(),
        })
        .collect()
}

fn push_entries(printer: &mut InfoPrinter, entries: &[PlanEntry]) {
    printer.push_block(
        entries
            .iter()
            .map(|e| format!("Worker {}: '{}'", e.worker, e.selection).into())
            .collect(),
    );
}

fn lowest_freq(dataset: &DatasetInfo) -> Option<f64> {
    dataset
        .spectral_windows
        .iter()
        .flat_map(|spw| spw.freqs.iter().copied())
        .reduce(f64::min)
}

#[derive(thiserror::Error, Debug)]
pub(super) enum PlanArgsError {
    #[error("No dataset description was specified")]
    NoDataset,

    #[error("Unknown partitioning mode '{0}'; valid modes are channel, time and cube")]
    UnknownMode(String),

    #[error("The number of partitions must be at least 1")]
    ZeroPartitions,

    #[error("Cube chunking needs --{0}")]
    CubeNeeds(&'static str),

    #[error("The dataset has no channels")]
    NoChannels,

    #[error("Can't write a plan to {}; supported formats are toml and json", .0.display())]
    OutputType(PathBuf),
}
