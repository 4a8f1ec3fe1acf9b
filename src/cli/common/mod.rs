// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Things shared between the `hyperimager` subcommands: argument files, user
//! warnings and pretty printing.

mod printers;

pub(super) use printers::InfoPrinter;
pub(super) use printers::{display_warnings, Warn};

use std::path::Path;

use itertools::Itertools;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

use super::HyperimagerError;
use crate::unit_parsing::parse_freq_hz;

lazy_static::lazy_static! {
    pub(super) static ref ARG_FILE_TYPES_COMMA_SEPARATED: String = ArgFileTypes::iter().join(", ");

    pub(super) static ref ARG_FILE_HELP: String =
        format!("All arguments may be specified in a file. Any CLI arguments override arguments set in the file. Supported formats: {}", *ARG_FILE_TYPES_COMMA_SEPARATED);
}

#[derive(Debug, Display, EnumIter, EnumString)]
pub(super) enum ArgFileTypes {
    #[strum(serialize = "toml")]
    Toml,
    #[strum(serialize = "json")]
    Json,
}

impl ArgFileTypes {
    /// The type of a file, judged by its extension.
    pub(super) fn from_path(path: &Path) -> Option<ArgFileTypes> {
        use std::str::FromStr;

        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .and_then(|e| ArgFileTypes::from_str(&e).ok())
    }
}

macro_rules! unpack_arg_file {
    ($arg_file:expr) => ({
        use std::{fs::File, io::Read};

        use crate::cli::common::{ArgFileTypes, ARG_FILE_TYPES_COMMA_SEPARATED};

        debug!("Attempting to parse argument file {}", $arg_file.display());

        let mut contents = String::new();
        match ArgFileTypes::from_path(&$arg_file) {
            Some(ArgFileTypes::Toml) => {
                debug!("Parsing toml file...");
                let mut fh = File::open(&$arg_file)?;
                fh.read_to_string(&mut contents)?;
                match toml::from_str(&contents) {
                    Ok(p) => p,
                    Err(err) => {
                        return Err(HyperimagerError::ArgFile(format!(
                            "Couldn't decode toml structure from {:?}:\n{err}",
                            $arg_file
                        )))
                    }
                }
            }
            Some(ArgFileTypes::Json) => {
                debug!("Parsing json file...");
                let mut fh = File::open(&$arg_file)?;
                fh.read_to_string(&mut contents)?;
                match serde_json::from_str(&contents) {
                    Ok(p) => p,
                    Err(err) => {
                        return Err(HyperimagerError::ArgFile(format!(
                            "Couldn't decode json structure from {:?}:\n{err}",
                            $arg_file
                        )))
                    }
                }
            }

            None => {
                return Err(HyperimagerError::ArgFile(format!(
                    "Argument file '{:?}' doesn't have a recognised file extension! Valid extensions are: {}", $arg_file, *ARG_FILE_TYPES_COMMA_SEPARATED)
                ))
            }
        }
    });
}

/// Turn user frequency bounds (e.g. "150MHz") into a frequency range \[Hz\].
/// A missing bound is unbounded on that side.
pub(super) fn parse_freq_range(
    begin: Option<&str>,
    end: Option<&str>,
) -> Result<Option<(f64, f64)>, HyperimagerError> {
    if begin.is_none() && end.is_none() {
        return Ok(None);
    }
    let lo = begin.map(parse_freq_hz).transpose()?.unwrap_or(0.0);
    let hi = end.map(parse_freq_hz).transpose()?.unwrap_or(f64::INFINITY);
    if lo > hi {
        return Err(HyperimagerError::Generic(format!(
            "The beginning of the frequency range ({lo} Hz) is after its end ({hi} Hz)"
        )));
    }
    Ok(Some((lo, hi)))
}
