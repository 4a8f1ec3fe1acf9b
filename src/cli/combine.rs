// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Combine partial image sets that have been written to disk.

use std::path::PathBuf;

use clap::Parser;
use log::{debug, info, trace};
use serde::{Deserialize, Serialize};

use super::common::{display_warnings, InfoPrinter, Warn, ARG_FILE_HELP};
use crate::{
    combine::{spectral_index, ImageCombiner, ImageSet},
    constants::DEFAULT_PB_LIMIT,
    image::{FitsImageStore, ImageKind, ImageStore},
    HyperimagerError,
};

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct CombineArgs {
    #[clap(name = "ARGUMENTS_FILE", help = ARG_FILE_HELP.as_str(), parse(from_os_str))]
    pub(super) args_file: Option<PathBuf>,

    /// The directory containing the partial images (as FITS files). Outputs
    /// are written here too. Default: the current directory
    #[clap(short = 'd', long, parse(from_os_str), help_heading = "INPUT FILES")]
    pub(super) image_dir: Option<PathBuf>,

    /// The stems of the partial image sets, in worker order. e.g. "img.Temp0"
    /// means that "img.Temp0.residual.fits" etc. are read.
    #[clap(short, long, multiple_values(true), help_heading = "INPUT FILES")]
    pub(super) partials: Option<Vec<String>>,

    /// The number of Taylor terms in each set. Default: 1
    #[clap(long, help_heading = "COMBINING")]
    pub(super) nterms: Option<usize>,

    /// Combined pixels whose sum of weights is at or below this fraction of
    /// the peak sum of weights are set to 0. Default: 0.1
    #[clap(long, help_heading = "COMBINING")]
    pub(super) pb_limit: Option<f64>,

    /// Weight each partial residual by its peak sum of weights only, rather
    /// than by its sum of weights at each pixel.
    #[clap(long, help_heading = "COMBINING")]
    #[serde(default)]
    pub(super) no_pbcorr: bool,

    /// Also write spectral index (and curvature) images, computed from the
    /// combined Taylor-term residuals. Needs at least 2 Taylor terms.
    #[clap(long, help_heading = "COMBINING")]
    #[serde(default)]
    pub(super) spectral_index: bool,

    /// The stem of the combined image set.
    #[clap(short, long, help_heading = "OUTPUT FILES")]
    pub(super) output: Option<String>,
}

#[derive(Debug)]
pub(super) struct CombineParams {
    store: FitsImageStore,
    partials: Vec<String>,
    nterms: usize,
    combiner: ImageCombiner,
    spectral_index: bool,
    output: String,
}

impl CombineArgs {
    pub(super) fn merge(self) -> Result<CombineArgs, HyperimagerError> {
        debug!("Merging command-line arguments with the argument file");

        let cli_args = self;

        if let Some(arg_file) = cli_args.args_file {
            let CombineArgs {
                args_file: _,
                image_dir,
                partials,
                nterms,
                pb_limit,
                no_pbcorr,
                spectral_index,
                output,
            } = unpack_arg_file!(arg_file);

            Ok(CombineArgs {
                args_file: None,
                image_dir: cli_args.image_dir.or(image_dir),
                partials: cli_args.partials.or(partials),
                nterms: cli_args.nterms.or(nterms),
                pb_limit: cli_args.pb_limit.or(pb_limit),
                no_pbcorr: cli_args.no_pbcorr || no_pbcorr,
                spectral_index: cli_args.spectral_index || spectral_index,
                output: cli_args.output.or(output),
            })
        } else {
            Ok(cli_args)
        }
    }

    pub(super) fn parse(self) -> Result<CombineParams, HyperimagerError> {
        debug!("{:#?}", self);

        let CombineArgs {
            args_file: _,
            image_dir,
            partials,
            nterms,
            pb_limit,
            no_pbcorr,
            spectral_index,
            output,
        } = self;

        let partials = match partials {
            Some(p) if !p.is_empty() => p,
            _ => return Err(CombineArgsError::NoPartials.into()),
        };
        let output = output.ok_or(CombineArgsError::NoOutput)?;
        if partials.contains(&output) {
            return Err(CombineArgsError::OutputIsInput(output).into());
        }
        let nterms = nterms.unwrap_or(1);
        if nterms == 0 {
            return Err(CombineArgsError::ZeroTerms.into());
        }
        if spectral_index && nterms < 2 {
            return Err(CombineArgsError::SpectralIndexTerms(nterms).into());
        }
        let pb_limit = pb_limit.unwrap_or(DEFAULT_PB_LIMIT);
        if !(0.0..1.0).contains(&pb_limit) {
            return Err(CombineArgsError::PbLimit(pb_limit).into());
        }
        if partials.len() == 1 {
            "Only one partial image set was given; it will be copied unchanged".warn();
        }

        let image_dir = image_dir.unwrap_or_else(|| PathBuf::from("."));
        let store = FitsImageStore::new(&image_dir)?;

        let mut printer = InfoPrinter::new("Combining partial images".into());
        printer.push_line(format!("Image directory: {}", image_dir.display()).into());
        printer.push_block(
            partials
                .iter()
                .enumerate()
                .map(|(i, p)| format!("Partial {i}: {p}").into())
                .collect(),
        );
        printer.push_block(vec![
            format!("Taylor terms: {nterms}").into(),
            format!("Primary-beam limit: {pb_limit}").into(),
            format!("Weighted by sum of weights: {}", !no_pbcorr).into(),
        ]);
        printer.push_line(format!("Output: {output}").into());
        printer.display();
        display_warnings();

        Ok(CombineParams {
            store,
            partials,
            nterms,
            combiner: ImageCombiner {
                pb_limit,
                dopbcorr: !no_pbcorr,
            },
            spectral_index,
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

impl CombineParams {
    fn run(self) -> Result<(), HyperimagerError> {
        let CombineParams {
            store,
            partials,
            nterms,
            combiner,
            spectral_index: write_spectral_index,
            output,
        } = self;

        let sets = partials
            .iter()
            .map(|stem| {
                debug!("Reading partial image set '{stem}'");
                ImageSet::read(&store, stem, nterms)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let combined = combiner.combine(&sets)?;
        combined.write(&store, &output)?;

        let stats = combined.residuals[0].stats();
        info!(
            "Combined {} partial image sets into '{output}'; peak residual {:.6} Jy",
            sets.len(),
            stats.peak_abs
        );

        if write_spectral_index {
            let (alpha, beta) = spectral_index(&combined.residuals)?;
            store.write(&ImageKind::Alpha.plain_name(&output), &alpha)?;
            if let Some(beta) = beta {
                store.write(&ImageKind::Beta.plain_name(&output), &beta)?;
            }
            debug!("Wrote spectral index images for '{output}'");
        }

        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub(super) enum CombineArgsError {
    #[error("No partial image sets were specified")]
    NoPartials,

    #[error("No output stem was specified")]
    NoOutput,

    #[error("The output stem '{0}' is also an input")]
    OutputIsInput(String),

    #[error("The number of Taylor terms must be at least 1")]
    ZeroTerms,

    #[error("Spectral indices need at least 2 Taylor terms, but only {0} were specified")]
    SpectralIndexTerms(usize),

    #[error("The primary-beam limit must be in [0, 1); got {0}")]
    PbLimit(f64),
}
