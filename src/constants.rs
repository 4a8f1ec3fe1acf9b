// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Useful constants.

Image pixels are stored in single precision, but anything accumulated over
many workers (sums of weights, weighted residuals) is done in double precision
before converting back.
 */

use std::time::Duration;

/// The fraction of the peak sum-of-weights below which combined pixels are set
/// to zero.
pub const DEFAULT_PB_LIMIT: f64 = 0.1;

/// The per-cycle threshold is the outer PSF sidelobe level multiplied by this
/// factor and the current peak residual.
pub const DEFAULT_CYCLE_FACTOR: f64 = 1.5;

/// The loop gain used by the minor cycle.
pub const DEFAULT_GAIN: f64 = 0.1;

/// The total number of minor-cycle iterations.
pub const DEFAULT_NITER: u32 = 1000;

/// The maximum number of minor-cycle iterations in a single major cycle.
pub const DEFAULT_NPERCYCLE: u32 = 100;

/// How long the controller sleeps between polls of outstanding jobs.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Pixels of the zeroth Taylor-term restored image below this value \[Jy\] do
/// not get a spectral index.
pub const SPECTRAL_INDEX_THRESHOLD: f64 = 1e-3;

/// When a PSF has no restoring beam, the beam size is guessed as the largest
/// image dimension divided by this.
pub const BEAM_GUESS_DIVISOR: usize = 50;

/// The bandwidth handed to every worker is the selected band widened by this
/// factor.
pub const BANDWIDTH_PADDING: f64 = 1.1;

/// Jobs are tagged with image stems beginning with this.
pub const WORKER_IMAGE_PREFIX: &str = "Temp";

/// Each worker gets a private directory of this name (suffixed with its index)
/// inside its scratch directory.
pub const WORKER_DIR_PREFIX: &str = "hyperimager_worker";
