// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Images, their coordinate grids, and places to keep them.
//!
//! All images are three dimensional, with axes (channel, y, x). Pixel values
//! are kept in single precision.

mod error;
pub(crate) mod fits;
mod store;

pub use error::ImageError;
pub use fits::FitsError;
pub use store::{FitsImageStore, ImageStore, MemoryImageStore};

use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

/// The coordinate grid of an image. Positions use a flat-sky approximation
/// around the phase centre, which is more than enough for regridding partial
/// images that were made with the same phase centre.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageGrid {
    pub nx: usize,
    pub ny: usize,
    pub nchan: usize,

    /// The pixel size along x and y \[radians\]. The x cell is usually
    /// negative (RA increases to the left).
    pub cell: [f64; 2],

    /// The (RA, Dec) of the reference pixel \[radians\].
    pub phase_centre: [f64; 2],

    /// The zero-indexed (x, y) pixel coordinates of the phase centre.
    pub ref_pixel: [f64; 2],

    /// The frequency of the first channel \[Hz\].
    pub freq_start: f64,

    /// \[Hz\]
    pub freq_step: f64,

    /// The restoring beam major axis \[radians\], if known.
    pub beam_major: Option<f64>,
}

impl ImageGrid {
    /// A grid with the phase centre in the middle pixel.
    pub fn new(nx: usize, ny: usize, nchan: usize, cell: f64, freq_start: f64, freq_step: f64) -> ImageGrid {
        ImageGrid {
            nx,
            ny,
            nchan,
            cell: [-cell, cell],
            phase_centre: [0.0, 0.0],
            ref_pixel: [(nx / 2) as f64, (ny / 2) as f64],
            freq_start,
            freq_step,
            beam_major: None,
        }
    }

    pub fn dim(&self) -> (usize, usize, usize) {
        (self.nchan, self.ny, self.nx)
    }

    pub fn validate(&self) -> Result<(), ImageError> {
        if self.nx == 0 || self.ny == 0 || self.nchan == 0 {
            return Err(ImageError::InvalidGrid(format!(
                "image has a zero-sized axis ({} x {} x {})",
                self.nchan, self.ny, self.nx
            )));
        }
        if self.cell.iter().any(|c| !c.is_finite() || *c == 0.0) {
            return Err(ImageError::InvalidGrid(format!(
                "cell size must be finite and non-zero; got {:?}",
                self.cell
            )));
        }
        if !self.freq_start.is_finite() || !self.freq_step.is_finite() {
            return Err(ImageError::InvalidGrid(format!(
                "spectral axis must be finite; got start {} step {}",
                self.freq_start, self.freq_step
            )));
        }
        Ok(())
    }

    /// Are the spatial and spectral axes of these grids the same? The
    /// restoring beam is not considered.
    pub fn same_as(&self, other: &ImageGrid) -> bool {
        fn close(a: f64, b: f64) -> bool {
            (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
        }
        self.dim() == other.dim()
            && close(self.cell[0], other.cell[0])
            && close(self.cell[1], other.cell[1])
            && close(self.phase_centre[0], other.phase_centre[0])
            && close(self.phase_centre[1], other.phase_centre[1])
            && close(self.ref_pixel[0], other.ref_pixel[0])
            && close(self.ref_pixel[1], other.ref_pixel[1])
            && (self.nchan == 1 || close(self.freq_step, other.freq_step))
            && close(self.freq_start, other.freq_start)
    }

    /// The frequency of a channel \[Hz\].
    pub fn chan_freq(&self, chan: usize) -> f64 {
        self.freq_start + chan as f64 * self.freq_step
    }

    /// The restoring beam major axis in pixels, if known.
    pub fn beam_major_pixels(&self) -> Option<f64> {
        self.beam_major
            .map(|b| b / self.cell[0].abs().min(self.cell[1].abs()))
    }
}

/// The different kinds of images that make up an imaging run.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum ImageKind {
    Model,
    Residual,
    Psf,
    Sumwt,
    Image,
    Flux,
    #[strum(serialize = "pbcoverage")]
    PbCoverage,
    Mask,
    Alpha,
    Beta,
}

impl ImageKind {
    /// The name of the image of this kind belonging to `stem`. Taylor-term
    /// images get a ".ttN" suffix, but only for wideband runs (`nterms > 1`).
    pub fn name(self, stem: &str, term: usize, nterms: usize) -> String {
        if nterms > 1 {
            format!("{stem}.{self}.tt{term}")
        } else {
            format!("{stem}.{self}")
        }
    }

    /// The name of a single (non Taylor-term) image of this kind.
    pub fn plain_name(self, stem: &str) -> String {
        format!("{stem}.{self}")
    }
}

/// Statistics of an image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageStats {
    pub min: f32,
    pub max: f32,

    /// The (channel, y, x) position of the maximum.
    pub max_pos: (usize, usize, usize),

    /// The largest absolute pixel value.
    pub peak_abs: f32,
}

/// Pixels and the grid they lie on.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub grid: ImageGrid,

    /// Axes are (channel, y, x).
    pub data: Array3<f32>,
}

impl Image {
    pub fn zeros(grid: ImageGrid) -> Image {
        Image::filled(grid, 0.0)
    }

    pub fn filled(grid: ImageGrid, value: f32) -> Image {
        Image {
            data: Array3::from_elem(grid.dim(), value),
            grid,
        }
    }

    pub fn from_array(grid: ImageGrid, data: Array3<f32>) -> Result<Image, ImageError> {
        if data.dim() != grid.dim() {
            return Err(ImageError::ShapeMismatch {
                expected: grid.dim(),
                got: data.dim(),
            });
        }
        Ok(Image { grid, data })
    }

    /// Min, max, position of max and peak absolute value. Non-finite pixels
    /// are ignored, unless there's nothing else.
    pub fn stats(&self) -> ImageStats {
        let mut stats = ImageStats {
            min: f32::INFINITY,
            max: f32::NEG_INFINITY,
            max_pos: (0, 0, 0),
            peak_abs: 0.0,
        };
        for (pos, &v) in self.data.indexed_iter() {
            if !v.is_finite() {
                continue;
            }
            if v < stats.min {
                stats.min = v;
            }
            if v > stats.max {
                stats.max = v;
                stats.max_pos = pos;
            }
            stats.peak_abs = stats.peak_abs.max(v.abs());
        }
        if stats.min > stats.max {
            stats.min = f32::NAN;
            stats.max = f32::NAN;
        }
        stats
    }

    /// Is every pixel exactly zero?
    pub fn is_zero(&self) -> bool {
        self.data.iter().all(|&v| v == 0.0)
    }

    /// Apply `f` to each pair of pixels of `self` and `other`, producing a new
    /// image on this image's grid.
    pub fn calc<F>(&self, other: &Image, f: F) -> Result<Image, ImageError>
    where
        F: Fn(f32, f32) -> f32,
    {
        self.check_same_shape(other)?;
        let mut out = self.clone();
        ndarray::Zip::from(&mut out.data)
            .and(&other.data)
            .for_each(|o, &b| *o = f(*o, b));
        Ok(out)
    }

    /// Where `condition` holds for this image's pixels, take `then`'s pixel,
    /// otherwise take `otherwise`.
    pub fn iif<C>(&self, condition: C, then: &Image, otherwise: f32) -> Result<Image, ImageError>
    where
        C: Fn(f32) -> bool,
    {
        self.check_same_shape(then)?;
        let mut out = then.clone();
        ndarray::Zip::from(&mut out.data)
            .and(&self.data)
            .for_each(|o, &c| {
                if !condition(c) {
                    *o = otherwise
                }
            });
        Ok(out)
    }

    fn check_same_shape(&self, other: &Image) -> Result<(), ImageError> {
        if self.data.dim() != other.data.dim() {
            return Err(ImageError::ShapeMismatch {
                expected: self.data.dim(),
                got: other.data.dim(),
            });
        }
        Ok(())
    }

    /// Copy `other`'s pixels into this image, with `other`'s first pixel
    /// landing at `offset` (channel, y, x). Anything that falls outside this
    /// image is dropped.
    pub fn insert(&mut self, other: &Image, offset: (usize, usize, usize)) {
        let (nc, ny, nx) = self.data.dim();
        let (oc, oy, ox) = other.data.dim();
        let c_end = nc.min(offset.0 + oc);
        let y_end = ny.min(offset.1 + oy);
        let x_end = nx.min(offset.2 + ox);
        if offset.0 >= c_end || offset.1 >= y_end || offset.2 >= x_end {
            return;
        }
        self.data
            .slice_mut(s![offset.0..c_end, offset.1..y_end, offset.2..x_end])
            .assign(&other.data.slice(s![
                ..c_end - offset.0,
                ..y_end - offset.1,
                ..x_end - offset.2
            ]));
    }

    /// Resample this image onto another grid with nearest-neighbour
    /// interpolation. Pixels of the new grid that don't map onto this image
    /// are 0. Channels are matched by frequency; a single-channel image is
    /// used for every output channel.
    pub fn regrid_to(&self, grid: &ImageGrid) -> Result<Image, ImageError> {
        self.grid.validate()?;
        grid.validate()?;
        if self.grid.same_as(grid) {
            let mut out = self.clone();
            out.grid = *grid;
            return Ok(out);
        }

        let src = &self.grid;
        let chan_map = (0..grid.nchan)
            .map(|c| {
                if src.nchan == 1 {
                    return Some(0);
                }
                let f = grid.chan_freq(c);
                let i = ((f - src.freq_start) / src.freq_step).round();
                (i >= 0.0 && (i as usize) < src.nchan).then_some(i as usize)
            })
            .collect::<Vec<_>>();
        let axis_map = |n: usize, axis: usize| -> Vec<Option<usize>> {
            (0..n)
                .map(|p| {
                    let offset = (p as f64 - grid.ref_pixel[axis]) * grid.cell[axis]
                        + (grid.phase_centre[axis] - src.phase_centre[axis]);
                    let i = (offset / src.cell[axis] + src.ref_pixel[axis]).round();
                    let len = if axis == 0 { src.nx } else { src.ny };
                    (i >= 0.0 && (i as usize) < len).then_some(i as usize)
                })
                .collect()
        };
        let x_map = axis_map(grid.nx, 0);
        let y_map = axis_map(grid.ny, 1);

        let mut out = Image::zeros(*grid);
        for ((c, y, x), v) in out.data.indexed_iter_mut() {
            if let (Some(sc), Some(sy), Some(sx)) = (chan_map[c], y_map[y], x_map[x]) {
                *v = self.data[(sc, sy, sx)];
            }
        }
        Ok(out)
    }
}
