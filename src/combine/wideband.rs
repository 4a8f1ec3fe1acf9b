// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Products of wideband (multi-Taylor-term) imaging.

use log::debug;

use super::CombineError;
use crate::{constants::SPECTRAL_INDEX_THRESHOLD, image::Image};

/// Get the spectral index (and, with at least 3 terms, the spectral curvature)
/// from restored Taylor-term images.
///
/// alpha = tt1 / tt0 and beta = tt2 / tt0 - alpha * (alpha - 1) / 2, computed
/// only where tt0 is above 1 mJy; both are 0 elsewhere.
pub fn spectral_index(taylor_images: &[Image]) -> Result<(Image, Option<Image>), CombineError> {
    let (tt0, tt1) = match taylor_images {
        [tt0, tt1, ..] => (tt0, tt1),
        _ => return Err(CombineError::TooFewTerms(taylor_images.len())),
    };
    debug!("Computing spectral index from {} Taylor terms", taylor_images.len());

    let threshold = SPECTRAL_INDEX_THRESHOLD as f32;
    let alpha = tt1.calc(tt0, |t1, t0| t1 / t0)?;
    let alpha = tt0.iif(|t0| t0 > threshold, &alpha, 0.0)?;

    let beta = match taylor_images.get(2) {
        Some(tt2) => {
            let curvature = tt2.calc(tt0, |t2, t0| t2 / t0)?;
            let curvature = curvature.calc(&alpha, |c, a| c - a * (a - 1.0) / 2.0)?;
            Some(tt0.iif(|t0| t0 > threshold, &curvature, 0.0)?)
        }
        None => None,
    };

    Ok((alpha, beta))
}
