// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Code to parse strings into plain numbers or some quantity with a unit.

mod error;
#[cfg(test)]
mod tests;

pub use error::UnitParseError;

use strum::IntoEnumIterator;
use strum_macros::{EnumIter, EnumString, IntoStaticStr};

#[derive(Debug, Clone, Copy, PartialEq, EnumIter, EnumString, IntoStaticStr)]
#[allow(non_camel_case_types)]
pub enum FluxFormat {
    /// Jansky
    Jy,

    /// milliJansky
    mJy,

    /// microJansky
    uJy,

    NoUnit,
}

impl FluxFormat {
    /// The factor to get Jansky.
    fn to_jy(self) -> f64 {
        match self {
            FluxFormat::Jy | FluxFormat::NoUnit => 1.0,
            FluxFormat::mJy => 1e-3,
            FluxFormat::uJy => 1e-6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, EnumIter, EnumString, IntoStaticStr)]
#[allow(non_camel_case_types)]
pub enum FreqFormat {
    /// Hertz
    Hz,

    /// kiloHertz
    kHz,

    /// MegaHertz
    MHz,

    /// GigaHertz
    GHz,

    NoUnit,
}

impl FreqFormat {
    /// The factor to get Hertz.
    fn to_hz(self) -> f64 {
        match self {
            FreqFormat::Hz | FreqFormat::NoUnit => 1.0,
            FreqFormat::kHz => 1e3,
            FreqFormat::MHz => 1e6,
            FreqFormat::GHz => 1e9,
        }
    }
}

/// Split a string like "1.5e-3 mJy" into its number and unit. The unit is the
/// trailing run of letters, so exponents are left with the number.
fn split_unit(s: &str) -> (&str, &str) {
    let s = s.trim();
    let number_end = s
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_alphabetic())
        .last()
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    (s[..number_end].trim(), &s[number_end..])
}

/// Parse a string that may have a unit of flux density attached to it.
pub fn parse_flux(s: &str) -> Result<(f64, FluxFormat), UnitParseError> {
    // Try to parse a naked number.
    let maybe_number: Option<f64> = s.trim().parse().ok();
    if let Some(number) = maybe_number {
        return Ok((number, FluxFormat::NoUnit));
    };

    // That didn't work; let's search over our supported formats.
    let (prefix, suffix) = split_unit(s);
    for flux_format in FluxFormat::iter().filter(|&f| f != FluxFormat::NoUnit) {
        let flux_format_str: &'static str = flux_format.into();
        if suffix == flux_format_str || suffix.to_uppercase() == flux_format_str.to_uppercase() {
            let number: f64 = match prefix.parse() {
                Ok(n) => n,
                Err(_) => {
                    return Err(UnitParseError::GotUnitButCantParse {
                        input: s.to_string(),
                        unit: flux_format_str,
                    })
                }
            };
            return Ok((number, flux_format));
        }
    }

    // If we made it this far, we don't know how to parse the string.
    Err(UnitParseError::Unknown {
        input: s.to_string(),
        unit_type: "flux density",
    })
}

/// Parse a string that may have a unit of frequency attached to it.
pub fn parse_freq(s: &str) -> Result<(f64, FreqFormat), UnitParseError> {
    let maybe_number: Option<f64> = s.trim().parse().ok();
    if let Some(number) = maybe_number {
        return Ok((number, FreqFormat::NoUnit));
    };

    let (prefix, suffix) = split_unit(s);
    for freq_format in FreqFormat::iter().filter(|&f| f != FreqFormat::NoUnit) {
        let freq_format_str: &'static str = freq_format.into();
        if suffix.to_uppercase() == freq_format_str.to_uppercase() {
            let number: f64 = match prefix.parse() {
                Ok(n) => n,
                Err(_) => {
                    return Err(UnitParseError::GotUnitButCantParse {
                        input: s.to_string(),
                        unit: freq_format_str,
                    })
                }
            };
            return Ok((number, freq_format));
        }
    }

    Err(UnitParseError::Unknown {
        input: s.to_string(),
        unit_type: "frequency",
    })
}

/// Parse a flux density into Jansky. Bare numbers are Jansky.
pub fn parse_flux_jy(s: &str) -> Result<f64, UnitParseError> {
    let (value, format) = parse_flux(s)?;
    Ok(value * format.to_jy())
}

/// Parse a frequency into Hertz. Bare numbers are Hertz.
pub fn parse_freq_hz(s: &str) -> Result<f64, UnitParseError> {
    let (value, format) = parse_freq(s)?;
    Ok(value * format.to_hz())
}
