// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Helper functions for reading and writing FITS images.

mod error;

pub use error::FitsError;

use std::{fmt::Display, path::Path};

use fitsio::{
    hdu::{FitsHdu, HduInfo},
    images::{ImageDescription, ImageType},
    FitsFile,
};
use ndarray::Array3;

use super::{Image, ImageGrid};

/// Open a fits file.
#[track_caller]
pub(crate) fn fits_open<P: AsRef<Path>>(file: P) -> Result<FitsFile, FitsError> {
    FitsFile::open(file.as_ref()).map_err(|e| {
        let caller = std::panic::Location::caller();
        FitsError::Open {
            fits_error: Box::new(e),
            fits_filename: file.as_ref().to_path_buf().into_boxed_path(),
            source_file: caller.file(),
            source_line: caller.line(),
            source_column: caller.column(),
        }
    })
}

/// Create a fits file with a float image of the given (channel, y, x) shape
/// as its primary HDU. An existing file is overwritten.
#[track_caller]
pub(crate) fn fits_create<P: AsRef<Path>>(
    file: P,
    dim: (usize, usize, usize),
) -> Result<FitsFile, FitsError> {
    let dimensions = [dim.0, dim.1, dim.2];
    let image_description = ImageDescription {
        data_type: ImageType::Float,
        dimensions: &dimensions,
    };
    FitsFile::create(file.as_ref())
        .with_custom_primary(&image_description)
        .overwrite()
        .open()
        .map_err(|e| {
            let caller = std::panic::Location::caller();
            FitsError::Open {
                fits_error: Box::new(e),
                fits_filename: file.as_ref().to_path_buf().into_boxed_path(),
                source_file: caller.file(),
                source_line: caller.line(),
                source_column: caller.column(),
            }
        })
}

#[track_caller]
fn fitsio_error<T: Display>(
    fits_fptr: &FitsFile,
    hdu_description: T,
    e: fitsio::errors::Error,
) -> FitsError {
    let caller = std::panic::Location::caller();
    FitsError::Fitsio {
        fits_error: Box::new(e),
        fits_filename: fits_fptr.file_path().to_path_buf().into_boxed_path(),
        hdu_description: format!("{hdu_description}").into_boxed_str(),
        source_file: caller.file(),
        source_line: caller.line(),
        source_column: caller.column(),
    }
}

/// Open a fits file's primary HDU.
#[track_caller]
pub(crate) fn fits_open_primary_hdu(fits_fptr: &mut FitsFile) -> Result<FitsHdu, FitsError> {
    fits_fptr
        .primary_hdu()
        .map_err(|e| fitsio_error(fits_fptr, 0, e))
}

/// Given a FITS file pointer, a HDU that belongs to it, and a keyword that may
/// or may not exist, pull out the value of the keyword, parsing it into the
/// desired type.
#[track_caller]
pub(crate) fn fits_get_optional_key<T: std::str::FromStr>(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    keyword: &str,
) -> Result<Option<T>, FitsError> {
    let unparsed_value: String = match hdu.read_key(fits_fptr, keyword) {
        Ok(key_value) => key_value,
        Err(e) => match &e {
            fitsio::errors::Error::Fits(fe) if matches!(fe.status, 202 | 204) => return Ok(None),
            _ => return Err(fitsio_error(fits_fptr, hdu.number + 1, e)),
        },
    };

    // String values come back with their quotes.
    match unparsed_value.trim().trim_matches('\'').trim().parse() {
        Ok(parsed_value) => Ok(Some(parsed_value)),
        Err(_) => {
            let caller = std::panic::Location::caller();
            Err(FitsError::Parse {
                key: keyword.to_string().into_boxed_str(),
                fits_filename: fits_fptr.file_path().to_path_buf().into_boxed_path(),
                hdu_num: hdu.number + 1,
                source_file: caller.file(),
                source_line: caller.line(),
                source_column: caller.column(),
            })
        }
    }
}

/// Given a FITS file pointer, a HDU that belongs to it, and a keyword, pull out
/// the value of the keyword, parsing it into the desired type.
#[track_caller]
pub(crate) fn fits_get_required_key<T: std::str::FromStr>(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    keyword: &str,
) -> Result<T, FitsError> {
    match fits_get_optional_key(fits_fptr, hdu, keyword) {
        Ok(Some(value)) => Ok(value),
        Ok(None) => {
            let caller = std::panic::Location::caller();
            Err(FitsError::MissingKey {
                key: keyword.to_string().into_boxed_str(),
                fits_filename: fits_fptr.file_path().to_path_buf().into_boxed_path(),
                hdu_num: hdu.number + 1,
                source_file: caller.file(),
                source_line: caller.line(),
                source_column: caller.column(),
            })
        }
        Err(error) => Err(error),
    }
}

/// Given a FITS file pointer and a HDU, read the associated image.
#[track_caller]
pub(crate) fn fits_get_image<T: fitsio::images::ReadImage>(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
) -> Result<T, FitsError> {
    match &hdu.info {
        HduInfo::ImageInfo { .. } => hdu
            .read_image(fits_fptr)
            .map_err(|e| fitsio_error(fits_fptr, hdu.number + 1, e)),
        _ => {
            let caller = std::panic::Location::caller();
            Err(FitsError::NotImage {
                fits_filename: fits_fptr.file_path().to_path_buf().into_boxed_path(),
                hdu_num: hdu.number + 1,
                source_file: caller.file(),
                source_line: caller.line(),
                source_column: caller.column(),
            })
        }
    }
}

/// Write an image and its coordinate grid. Angles are written in degrees and
/// reference pixels are one-indexed, as is FITS convention.
pub(crate) fn write_image(file: &Path, image: &Image) -> Result<(), FitsError> {
    let mut fptr = fits_create(file, image.data.dim())?;
    let hdu = fits_open_primary_hdu(&mut fptr)?;
    let g = &image.grid;

    // Get the data contiguous in (channel, y, x) order.
    let data = image.data.iter().copied().collect::<Vec<f32>>();
    hdu.write_image(&mut fptr, &data)
        .map_err(|e| fitsio_error(&fptr, 0, e))?;

    let mut write = |key: &str, value: f64| {
        hdu.write_key(&mut fptr, key, value)
            .map_err(|e| fitsio_error(&fptr, 0, e))
    };
    write("CRVAL1", g.phase_centre[0].to_degrees())?;
    write("CDELT1", g.cell[0].to_degrees())?;
    write("CRPIX1", g.ref_pixel[0] + 1.0)?;
    write("CRVAL2", g.phase_centre[1].to_degrees())?;
    write("CDELT2", g.cell[1].to_degrees())?;
    write("CRPIX2", g.ref_pixel[1] + 1.0)?;
    write("CRVAL3", g.freq_start)?;
    write("CDELT3", g.freq_step)?;
    write("CRPIX3", 1.0)?;
    if let Some(bmaj) = g.beam_major {
        write("BMAJ", bmaj.to_degrees())?;
    }

    for (key, value) in [
        ("CTYPE1", "RA---SIN"),
        ("CTYPE2", "DEC--SIN"),
        ("CTYPE3", "FREQ"),
        ("BUNIT", "JY/BEAM"),
    ] {
        hdu.write_key(&mut fptr, key, value)
            .map_err(|e| fitsio_error(&fptr, 0, e))?;
    }
    hdu.write_key(
        &mut fptr,
        "SOFTWARE",
        format!(
            "Created by {} v{}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        ),
    )
    .map_err(|e| fitsio_error(&fptr, 0, e))?;

    Ok(())
}

/// Read an image written by [`write_image`] (or anything else with the same
/// three axes and keys).
pub(crate) fn read_image(file: &Path) -> Result<Image, FitsError> {
    let mut fptr = fits_open(file)?;
    let hdu = fits_open_primary_hdu(&mut fptr)?;
    let naxis: usize = fits_get_required_key(&mut fptr, &hdu, "NAXIS")?;
    if naxis != 3 {
        return Err(FitsError::Dimensions {
            fits_filename: file.to_path_buf().into_boxed_path(),
            naxis,
        });
    }
    let nx: usize = fits_get_required_key(&mut fptr, &hdu, "NAXIS1")?;
    let ny: usize = fits_get_required_key(&mut fptr, &hdu, "NAXIS2")?;
    let nchan: usize = fits_get_required_key(&mut fptr, &hdu, "NAXIS3")?;

    let crval1: f64 = fits_get_required_key(&mut fptr, &hdu, "CRVAL1")?;
    let cdelt1: f64 = fits_get_required_key(&mut fptr, &hdu, "CDELT1")?;
    let crpix1: f64 = fits_get_required_key(&mut fptr, &hdu, "CRPIX1")?;
    let crval2: f64 = fits_get_required_key(&mut fptr, &hdu, "CRVAL2")?;
    let cdelt2: f64 = fits_get_required_key(&mut fptr, &hdu, "CDELT2")?;
    let crpix2: f64 = fits_get_required_key(&mut fptr, &hdu, "CRPIX2")?;
    let crval3: f64 = fits_get_required_key(&mut fptr, &hdu, "CRVAL3")?;
    let cdelt3: f64 = fits_get_required_key(&mut fptr, &hdu, "CDELT3")?;
    let crpix3: f64 = fits_get_optional_key(&mut fptr, &hdu, "CRPIX3")?.unwrap_or(1.0);
    let bmaj: Option<f64> = fits_get_optional_key(&mut fptr, &hdu, "BMAJ")?;

    let grid = ImageGrid {
        nx,
        ny,
        nchan,
        cell: [cdelt1.to_radians(), cdelt2.to_radians()],
        phase_centre: [crval1.to_radians(), crval2.to_radians()],
        ref_pixel: [crpix1 - 1.0, crpix2 - 1.0],
        freq_start: crval3 - (crpix3 - 1.0) * cdelt3,
        freq_step: cdelt3,
        beam_major: bmaj.map(f64::to_radians),
    };

    let data: Vec<f32> = fits_get_image(&mut fptr, &hdu)?;
    let data = Array3::from_shape_vec((nchan, ny, nx), data).map_err(|_| FitsError::Dimensions {
        fits_filename: file.to_path_buf().into_boxed_path(),
        naxis,
    })?;
    Ok(Image { grid, data })
}
