// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Make a clean mask on the grid of an existing image.

use std::path::PathBuf;

use clap::Parser;
use log::{debug, info, trace};
use serde::{Deserialize, Serialize};

use super::common::{display_warnings, InfoPrinter, Warn, ARG_FILE_HELP};
use crate::{
    image::{FitsImageStore, ImageStore},
    mask::{get_or_build, restrict_to_coverage},
    HyperimagerError,
};

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct MakeMaskArgs {
    #[clap(name = "ARGUMENTS_FILE", help = ARG_FILE_HELP.as_str(), parse(from_os_str))]
    pub(super) args_file: Option<PathBuf>,

    /// The directory containing the images (as FITS files). The mask is
    /// written here too. Default: the current directory
    #[clap(short = 'd', long, parse(from_os_str), help_heading = "INPUT FILES")]
    pub(super) image_dir: Option<PathBuf>,

    /// The image whose grid the mask is made on, e.g. "img.residual".
    #[clap(short, long, help_heading = "INPUT FILES")]
    pub(super) template: Option<String>,

    /// An existing mask to regrid onto the template. If not given, the mask
    /// covers the whole template.
    #[clap(short, long, help_heading = "INPUT FILES")]
    pub(super) mask: Option<String>,

    /// A primary-beam coverage image. The mask is zeroed wherever this image
    /// is zero.
    #[clap(short, long, help_heading = "INPUT FILES")]
    pub(super) coverage: Option<String>,

    /// The name of the output mask. Default: the template's name with
    /// ".mask" appended
    #[clap(short, long, help_heading = "OUTPUT FILES")]
    pub(super) output: Option<String>,
}

#[derive(Debug)]
pub(super) struct MakeMaskParams {
    store: FitsImageStore,
    template: String,
    mask: Option<String>,
    coverage: Option<String>,
    output: String,
}

impl MakeMaskArgs {
    pub(super) fn merge(self) -> Result<MakeMaskArgs, HyperimagerError> {
        debug!("Merging command-line arguments with the argument file");

        let cli_args = self;

        if let Some(arg_file) = cli_args.args_file {
            let MakeMaskArgs {
                args_file: _,
                image_dir,
                template,
                mask,
                coverage,
                output,
            } = unpack_arg_file!(arg_file);

            Ok(MakeMaskArgs {
                args_file: None,
                image_dir: cli_args.image_dir.or(image_dir),
                template: cli_args.template.or(template),
                mask: cli_args.mask.or(mask),
                coverage: cli_args.coverage.or(coverage),
                output: cli_args.output.or(output),
            })
        } else {
            Ok(cli_args)
        }
    }

    pub(super) fn parse(self) -> Result<MakeMaskParams, HyperimagerError> {
        debug!("{:#?}", self);

        let MakeMaskArgs {
            args_file: _,
            image_dir,
            template,
            mask,
            coverage,
            output,
        } = self;

        let template = template.ok_or(MakeMaskArgsError::NoTemplate)?;
        let output = output.unwrap_or_else(|| format!("{template}.mask"));
        if output == template || coverage.as_ref() == Some(&output) {
            return Err(MakeMaskArgsError::OutputIsInput(output).into());
        }
        if mask.as_ref() == Some(&output) {
            format!("The mask '{output}' will be overwritten by its regridded version").warn();
        }

        let image_dir = image_dir.unwrap_or_else(|| PathBuf::from("."));
        let store = FitsImageStore::new(&image_dir)?;
        for name in std::iter::once(&template).chain(&mask).chain(&coverage) {
            if !store.exists(name) {
                return Err(MakeMaskArgsError::Missing(store.path(name)).into());
            }
        }

        let mut printer = InfoPrinter::new("Making a clean mask".into());
        printer.push_line(format!("Image directory: {}", image_dir.display()).into());
        let mut block = vec![format!("Template: {template}").into()];
        match mask.as_ref() {
            Some(m) => block.push(format!("Regridding mask: {m}").into()),
            None => block.push("Cleaning everywhere".into()),
        }
        if let Some(c) = coverage.as_ref() {
            block.push(format!("Restricted to the coverage of: {c}").into());
        }
        printer.push_block(block);
        printer.push_line(format!("Output: {output}").into());
        printer.display();
        display_warnings();

        Ok(MakeMaskParams {
            store,
            template,
            mask,
            coverage,
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

impl MakeMaskParams {
    fn run(self) -> Result<(), HyperimagerError> {
        let MakeMaskParams {
            store,
            template,
            mask,
            coverage,
            output,
        } = self;

        let template = store.read(&template)?;
        let mut clean_mask = get_or_build(&store, mask.as_deref(), &template)?;
        if let Some(coverage) = coverage {
            let coverage = store.read(&coverage)?;
            clean_mask = restrict_to_coverage(&clean_mask, &coverage)?;
        }
        store.write(&output, &clean_mask)?;

        let num_unmasked = clean_mask.data.iter().filter(|&&v| v > 0.0).count();
        info!(
            "Wrote mask '{output}' ({num_unmasked} of {} pixels can be cleaned)",
            clean_mask.data.len()
        );

        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub(super) enum MakeMaskArgsError {
    #[error("No template image was specified")]
    NoTemplate,

    #[error("The output mask '{0}' is also an input")]
    OutputIsInput(String),

    #[error("Image {} doesn't exist", .0.display())]
    Missing(PathBuf),
}
