// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use approx::assert_abs_diff_eq;

use super::*;

#[test]
fn test_parse_flux_without_units() {
    for s in ["1", "1.0", " 1.0 ", "1e0"] {
        let (value, format) = parse_flux(s).unwrap();
        assert_abs_diff_eq!(value, 1.0);
        assert_eq!(format, FluxFormat::NoUnit);
    }
}

#[test]
fn test_parse_flux_with_units() {
    let (value, format) = parse_flux("0.5mJy").unwrap();
    assert_abs_diff_eq!(value, 0.5);
    assert_eq!(format, FluxFormat::mJy);

    let (value, format) = parse_flux("1e-3 Jy").unwrap();
    assert_abs_diff_eq!(value, 1e-3);
    assert_eq!(format, FluxFormat::Jy);

    assert_abs_diff_eq!(parse_flux_jy("0.5mJy").unwrap(), 5e-4);
    assert_abs_diff_eq!(parse_flux_jy("20 uJy").unwrap(), 2e-5);
    assert_abs_diff_eq!(parse_flux_jy("0.1").unwrap(), 0.1);
    assert_abs_diff_eq!(parse_flux_jy("2JY").unwrap(), 2.0);
}

#[test]
fn test_parse_flux_errors() {
    assert!(matches!(
        parse_flux("1.2.3Jy"),
        Err(UnitParseError::GotUnitButCantParse { unit: "Jy", .. })
    ));
    assert!(matches!(
        parse_flux("1 furlong"),
        Err(UnitParseError::Unknown {
            unit_type: "flux density",
            ..
        })
    ));
}

#[test]
fn test_parse_freq() {
    assert_abs_diff_eq!(parse_freq_hz("150e6").unwrap(), 150e6);
    assert_abs_diff_eq!(parse_freq_hz("150MHz").unwrap(), 150e6);
    assert_abs_diff_eq!(parse_freq_hz("1.4 GHz").unwrap(), 1.4e9);
    assert_abs_diff_eq!(parse_freq_hz("40khz").unwrap(), 40e3);
    assert!(parse_freq_hz("MHz").is_err());
}
