// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Clean masks.


use log::{debug, info};
use thiserror::Error;

use crate::image::{Image, ImageError, ImageStore};

/// Get a clean mask on the grid of `template`.
///
/// If `existing` names an image in the store, it is regridded onto the
/// template's grid (nearest neighbour). Otherwise (including when the named
/// mask doesn't exist), a mask of ones covering the whole template grid is
/// made.
pub fn get_or_build(
    store: &dyn ImageStore,
    existing: Option<&str>,
    template: &Image,
) -> Result<Image, MaskError> {
    match existing {
        Some(name) if store.exists(name) => {
            info!("Using clean mask '{name}'");
            let mask = store.read(name)?;
            if mask.grid.same_as(&template.grid) {
                return Ok(Image {
                    grid: template.grid,
                    data: mask.data,
                });
            }
            debug!("Regridding mask '{name}' onto the image grid");
            mask.regrid_to(&template.grid)
                .map_err(|err| MaskError::Regrid {
                    name: name.to_string(),
                    err,
                })
        }
        Some(name) => {
            info!("Clean mask '{name}' doesn't exist; cleaning the whole image");
            Ok(Image::filled(template.grid, 1.0))
        }
        None => {
            debug!("No clean mask given; cleaning everywhere");
            Ok(Image::filled(template.grid, 1.0))
        }
    }
}

/// Zero the mask wherever the coverage image is zero. Used for mosaics, where
/// there is nothing to clean outside the coverage of the pointings.
pub fn restrict_to_coverage(mask: &Image, coverage: &Image) -> Result<Image, MaskError> {
    let coverage = if coverage.grid.same_as(&mask.grid) {
        coverage.clone()
    } else {
        coverage.regrid_to(&mask.grid)?
    };
    Ok(coverage.iif(|c| c != 0.0, mask, 0.0)?)
}

#[derive(Error, Debug)]
pub enum MaskError {
    #[error("Couldn't regrid clean mask '{name}' onto the image grid: {err}")]
    Regrid { name: String, err: ImageError },

    #[error(transparent)]
    Image(#[from] ImageError),
}
