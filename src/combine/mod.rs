// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Combining the partial images made by each worker into global images.
//!
//! Sums are accumulated in double precision. Wherever the combined sum of
//! weights is at or below `pb_limit` times its peak, combined pixels are set to
//! exactly 0; the edges of a primary beam would otherwise be divided by almost
//! nothing.

mod error;
#[cfg(test)]
mod tests;
mod wideband;

pub use error::CombineError;
pub use wideband::spectral_index;

use log::{debug, trace};
use ndarray::prelude::*;
use rayon::prelude::*;

use crate::{
    constants::DEFAULT_PB_LIMIT,
    image::{Image, ImageError, ImageGrid, ImageKind, ImageStore},
};

/// The per-Taylor-term images of an imaging run. Each worker makes one of these
/// (its partial images) every major cycle, and the controller keeps a global
/// one.
///
/// All images in a set share a grid. There are `nterms` models, residuals and
/// sums of weights, and `2 * nterms - 1` PSFs.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSet {
    pub models: Vec<Image>,
    pub residuals: Vec<Image>,
    pub psfs: Vec<Image>,
    pub sumwts: Vec<Image>,
}

impl ImageSet {
    pub fn zeros(grid: ImageGrid, nterms: usize) -> ImageSet {
        ImageSet {
            models: vec![Image::zeros(grid); nterms],
            residuals: vec![Image::zeros(grid); nterms],
            psfs: vec![Image::zeros(grid); num_psf_terms(nterms)],
            sumwts: vec![Image::zeros(grid); nterms],
        }
    }

    pub fn nterms(&self) -> usize {
        self.residuals.len()
    }

    /// The grid of the first residual.
    pub fn grid(&self) -> Option<&ImageGrid> {
        self.residuals.first().map(|i| &i.grid)
    }

    /// Read the set called `stem` from a store.
    pub fn read(store: &dyn ImageStore, stem: &str, nterms: usize) -> Result<ImageSet, ImageError> {
        let read_terms = |kind: ImageKind, n: usize| -> Result<Vec<Image>, ImageError> {
            (0..n)
                .map(|t| store.read(&kind.name(stem, t, nterms)))
                .collect()
        };
        Ok(ImageSet {
            models: read_terms(ImageKind::Model, nterms)?,
            residuals: read_terms(ImageKind::Residual, nterms)?,
            psfs: read_terms(ImageKind::Psf, num_psf_terms(nterms))?,
            sumwts: read_terms(ImageKind::Sumwt, nterms)?,
        })
    }

    /// Write this set as `stem` into a store.
    pub fn write(&self, store: &dyn ImageStore, stem: &str) -> Result<(), ImageError> {
        let nterms = self.nterms();
        for (kind, images) in self.kinds() {
            for (t, image) in images.iter().enumerate() {
                store.write(&kind.name(stem, t, nterms), image)?;
            }
        }
        Ok(())
    }

    /// Delete all images of the set `stem` from a store.
    pub fn delete(store: &dyn ImageStore, stem: &str, nterms: usize) -> Result<(), ImageError> {
        for kind in [
            ImageKind::Model,
            ImageKind::Residual,
            ImageKind::Sumwt,
        ] {
            for t in 0..nterms {
                store.delete(&kind.name(stem, t, nterms))?;
            }
        }
        for t in 0..num_psf_terms(nterms) {
            store.delete(&ImageKind::Psf.name(stem, t, nterms))?;
        }
        Ok(())
    }

    fn kinds(&self) -> [(ImageKind, &[Image]); 4] {
        [
            (ImageKind::Model, self.models.as_slice()),
            (ImageKind::Residual, self.residuals.as_slice()),
            (ImageKind::Psf, self.psfs.as_slice()),
            (ImageKind::Sumwt, self.sumwts.as_slice()),
        ]
    }

    fn kinds_mut(&mut self) -> [&mut Vec<Image>; 4] {
        [
            &mut self.models,
            &mut self.residuals,
            &mut self.psfs,
            &mut self.sumwts,
        ]
    }

    /// Resample every image in this set onto `grid`.
    pub fn regrid_to(&self, grid: &ImageGrid) -> Result<ImageSet, ImageError> {
        let mut out = self.clone();
        for images in out.kinds_mut() {
            for image in images.iter_mut() {
                if !image.grid.same_as(grid) {
                    *image = image.regrid_to(grid)?;
                }
            }
        }
        Ok(out)
    }

    /// Are all images present in the right numbers?
    fn check_terms(&self, index: usize, nterms: usize) -> Result<(), CombineError> {
        for (kind, images) in self.kinds() {
            let expected = if kind == ImageKind::Psf {
                num_psf_terms(nterms)
            } else {
                nterms
            };
            if images.len() != expected {
                return Err(CombineError::TermCount {
                    index,
                    kind: kind.into(),
                    expected,
                    got: images.len(),
                });
            }
        }
        Ok(())
    }
}

/// The number of PSF Taylor terms needed for `nterms` model terms.
pub fn num_psf_terms(nterms: usize) -> usize {
    (2 * nterms).saturating_sub(1)
}

/// Combines partial images, applying the primary-beam limit.
#[derive(Debug, Clone, Copy)]
pub struct ImageCombiner {
    /// Combined pixels whose sum of weights is at or below this fraction of
    /// the peak sum of weights are set to 0.
    pub pb_limit: f64,

    /// Weight each partial residual by its sum of weights (true), or by its
    /// peak sum of weights only (false).
    pub dopbcorr: bool,
}

impl Default for ImageCombiner {
    fn default() -> Self {
        ImageCombiner {
            pb_limit: DEFAULT_PB_LIMIT,
            dopbcorr: true,
        }
    }
}

fn to_f64(image: &Image) -> Array3<f64> {
    image.data.mapv(f64::from)
}

fn peak(a: ArrayView3<f64>) -> f64 {
    a.iter().copied().filter(|v| v.is_finite()).fold(0.0, f64::max)
}

impl ImageCombiner {
    /// Combine the partial image sets of all workers. The order of `partials`
    /// must be the worker order; arrival order doesn't matter.
    ///
    /// A single partial set is returned unchanged. Otherwise, residuals and
    /// sums of weights are combined with [`ImageCombiner::combine_residuals`],
    /// PSFs with [`ImageCombiner::combine_psfs`], and the models are taken from
    /// the first partial (all workers hold the same model).
    pub fn combine(&self, partials: &[ImageSet]) -> Result<ImageSet, CombineError> {
        let mut partials = align(partials)?;
        if partials.len() == 1 {
            return Ok(partials.swap_remove(0));
        }
        debug!("Combining {} partial image sets", partials.len());
        let (residuals, sumwts) = self.combine_aligned_residuals(&partials);
        let psfs = combine_aligned_psfs(&partials);
        Ok(ImageSet {
            models: partials[0].models.clone(),
            residuals,
            psfs,
            sumwts,
        })
    }

    /// Combine the residuals and sums of weights of each Taylor term. Returns
    /// the combined (residuals, sums of weights).
    pub fn combine_residuals(
        &self,
        partials: &[ImageSet],
    ) -> Result<(Vec<Image>, Vec<Image>), CombineError> {
        let partials = align(partials)?;
        if partials.len() == 1 {
            let only = &partials[0];
            return Ok((only.residuals.clone(), only.sumwts.clone()));
        }
        Ok(self.combine_aligned_residuals(&partials))
    }

    fn combine_aligned_residuals(&self, partials: &[ImageSet]) -> (Vec<Image>, Vec<Image>) {
        let nterms = partials[0].nterms();
        let grid = partials[0].residuals[0].grid;
        let dim = grid.dim();

        let mut acc_resid = vec![Array3::<f64>::zeros(dim); nterms];
        let mut acc_sumwt = vec![Array3::<f64>::zeros(dim); nterms];
        for (i_partial, partial) in partials.iter().enumerate() {
            let sumwt0 = to_f64(&partial.sumwts[0]);
            let own_peak = peak(sumwt0.view());
            trace!("Partial {i_partial}: peak sum of weights {own_peak}");
            for t in 0..nterms {
                let resid = to_f64(&partial.residuals[t]);
                if self.dopbcorr {
                    acc_resid[t] += &(&resid * &sumwt0);
                } else {
                    acc_resid[t].scaled_add(own_peak, &resid);
                }
                acc_sumwt[t] += &to_f64(&partial.sumwts[t]);
            }
        }

        let global_peak = peak(acc_sumwt[0].view());
        let limit = self.pb_limit * global_peak;
        debug!("Combined peak sum of weights {global_peak}; masking at {limit}");
        let residuals = acc_resid
            .into_iter()
            .map(|resid| {
                let mut data = Array3::<f32>::zeros(dim);
                ndarray::Zip::from(&mut data)
                    .and(&resid)
                    .and(&acc_sumwt[0])
                    .for_each(|out, &r, &w| {
                        if w > limit {
                            let norm = if self.dopbcorr { w } else { global_peak };
                            *out = (r / norm) as f32;
                        }
                    });
                Image { grid, data }
            })
            .collect();
        let sumwts = acc_sumwt
            .into_iter()
            .map(|w| Image {
                grid,
                data: w.mapv(|v| v as f32),
            })
            .collect();
        (residuals, sumwts)
    }

    /// Combine the PSFs of each Taylor term. PSFs are peak-normalised by each
    /// worker, so they are plainly averaged rather than weighted.
    pub fn combine_psfs(&self, partials: &[ImageSet]) -> Result<Vec<Image>, CombineError> {
        let partials = align(partials)?;
        if partials.len() == 1 {
            return Ok(partials[0].psfs.clone());
        }
        Ok(combine_aligned_psfs(&partials))
    }

    /// Sum the images and divide by their count. Used for mosaic flux and
    /// coverage images.
    pub fn average(&self, images: &[Image]) -> Result<Image, CombineError> {
        let images = align_images(images)?;
        Ok(plain_average(&images))
    }

    /// The weighted average of `images`, pixel by pixel, masked where the
    /// summed weight is at or below the primary-beam limit. A single image is
    /// returned unchanged.
    pub fn weighted_average(&self, images: &[Image], weights: &[Image]) -> Result<Image, CombineError> {
        if images.len() != weights.len() {
            return Err(CombineError::WeightCount {
                images: images.len(),
                weights: weights.len(),
            });
        }
        let images = align_images(images)?;
        if images.len() == 1 {
            return Ok(images[0].clone());
        }
        let grid = images[0].grid;
        let weights = align_images_to(weights, &grid)?;

        let dim = grid.dim();
        let mut num = Array3::<f64>::zeros(dim);
        let mut den = Array3::<f64>::zeros(dim);
        for (image, weight) in images.iter().zip(weights.iter()) {
            let w = to_f64(weight);
            num += &(&to_f64(image) * &w);
            den += &w;
        }
        let limit = self.pb_limit * peak(den.view());
        let mut data = Array3::<f32>::zeros(dim);
        ndarray::Zip::from(&mut data)
            .and(&num)
            .and(&den)
            .for_each(|out, &n, &d| {
                if d > limit {
                    *out = (n / d) as f32;
                }
            });
        Ok(Image { grid, data })
    }

    /// The model image to hand to every worker. With primary-beam correction
    /// the global model is used as is. Without, it is rescaled by the peak sum
    /// of weights over the local sum of weights, and set to 0 where that is at
    /// or below the primary-beam limit.
    pub fn scatter_model(&self, model: &Image, sumwt0: &Image) -> Result<Image, CombineError> {
        if self.dopbcorr {
            return Ok(model.clone());
        }
        let sumwt0 = if sumwt0.grid.same_as(&model.grid) {
            sumwt0.clone()
        } else {
            sumwt0.regrid_to(&model.grid)?
        };
        let w = to_f64(&sumwt0);
        let max = peak(w.view());
        let limit = self.pb_limit * max;
        let mut out = model.clone();
        ndarray::Zip::from(&mut out.data)
            .and(&w)
            .for_each(|m, &w| {
                *m = if w > limit {
                    (f64::from(*m) * max / w) as f32
                } else {
                    0.0
                };
            });
        Ok(out)
    }
}

fn combine_aligned_psfs(partials: &[ImageSet]) -> Vec<Image> {
    let num_psfs = partials[0].psfs.len();
    (0..num_psfs)
        .map(|t| {
            let psfs = partials
                .iter()
                .map(|p| p.psfs[t].clone())
                .collect::<Vec<_>>();
            plain_average(&psfs)
        })
        .collect()
}

fn plain_average(images: &[Image]) -> Image {
    let grid = images[0].grid;
    let mut acc = Array3::<f64>::zeros(grid.dim());
    for image in images {
        acc += &to_f64(image);
    }
    let n = images.len() as f64;
    Image {
        grid,
        data: acc.mapv(|v| (v / n) as f32),
    }
}

/// Check the partial sets and regrid all of them onto the grid of the first.
fn align(partials: &[ImageSet]) -> Result<Vec<ImageSet>, CombineError> {
    let first = partials.first().ok_or(CombineError::NoPartials)?;
    let nterms = first.nterms();
    let grid = *first.grid().ok_or(CombineError::TermCount {
        index: 0,
        kind: "residual",
        expected: 1,
        got: 0,
    })?;
    partials
        .par_iter()
        .enumerate()
        .map(|(index, p)| {
            p.check_terms(index, nterms)?;
            p.regrid_to(&grid)
                .map_err(|err| CombineError::GridMismatch { index, err })
        })
        .collect()
}

fn align_images(images: &[Image]) -> Result<Vec<Image>, CombineError> {
    let first = images.first().ok_or(CombineError::NoPartials)?;
    align_images_to(images, &first.grid)
}

fn align_images_to(images: &[Image], grid: &ImageGrid) -> Result<Vec<Image>, CombineError> {
    images
        .par_iter()
        .enumerate()
        .map(|(index, image)| {
            if image.grid.same_as(grid) {
                Ok(image.clone())
            } else {
                image
                    .regrid_to(grid)
                    .map_err(|err| CombineError::GridMismatch { index, err })
            }
        })
        .collect()
}
