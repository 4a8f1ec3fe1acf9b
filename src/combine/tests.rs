// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use approx::assert_abs_diff_eq;
use ndarray::array;

use super::*;
use crate::image::MemoryImageStore;

fn grid() -> ImageGrid {
    ImageGrid::new(2, 1, 1, 1e-4, 150e6, 1e6)
}

fn image(values: [f32; 2]) -> Image {
    Image::from_array(grid(), array![[[values[0], values[1]]]]).unwrap()
}

/// A single-term partial set.
fn partial(residual: [f32; 2], sumwt: [f32; 2], psf: [f32; 2]) -> ImageSet {
    ImageSet {
        models: vec![image([0.0, 0.0])],
        residuals: vec![image(residual)],
        psfs: vec![image(psf)],
        sumwts: vec![image(sumwt)],
    }
}

#[test]
fn test_single_partial_is_copied_exactly() {
    let p = partial([1.0, 2.0], [5.0, 0.01], [1.0, 0.2]);
    let combiner = ImageCombiner::default();
    let combined = combiner.combine(&[p.clone()]).unwrap();
    // No normalisation or masking happens, even where the weight is tiny.
    assert_eq!(combined, p);
}

#[test]
fn test_weighted_combine() {
    let combiner = ImageCombiner {
        pb_limit: 0.1,
        dopbcorr: true,
    };
    let partials = [
        partial([1.0, 1.0], [1.0, 1.0], [1.0, 0.2]),
        partial([3.0, 3.0], [3.0, 3.0], [1.0, 0.4]),
    ];
    let combined = combiner.combine(&partials).unwrap();
    // (1 * 1 + 3 * 3) / (1 + 3)
    assert_abs_diff_eq!(combined.residuals[0].data[(0, 0, 0)], 2.5);
    assert_abs_diff_eq!(combined.sumwts[0].data[(0, 0, 0)], 4.0);
    // PSFs are averaged, not weighted.
    assert_abs_diff_eq!(combined.psfs[0].data[(0, 0, 0)], 1.0);
    assert_abs_diff_eq!(combined.psfs[0].data[(0, 0, 1)], 0.3, epsilon = 1e-6);
}

#[test]
fn test_pb_limit_masks_to_exactly_zero() {
    let combiner = ImageCombiner {
        pb_limit: 0.1,
        dopbcorr: true,
    };
    let partials = [
        partial([1.0, 100.0], [10.0, 0.5], [1.0, 0.0]),
        partial([1.0, 100.0], [10.0, 0.5], [1.0, 0.0]),
    ];
    let (residuals, sumwts) = combiner.combine_residuals(&partials).unwrap();
    assert_abs_diff_eq!(residuals[0].data[(0, 0, 0)], 1.0);
    // 1.0 is below 0.1 * 20.
    assert_eq!(residuals[0].data[(0, 0, 1)], 0.0);
    assert_abs_diff_eq!(sumwts[0].data[(0, 0, 1)], 1.0);
}

#[test]
fn test_unweighted_combine() {
    let combiner = ImageCombiner {
        pb_limit: 0.1,
        dopbcorr: false,
    };
    let partials = [
        partial([1.0, 1.0], [2.0, 1.0], [1.0, 0.0]),
        partial([3.0, 5.0], [2.0, 1.0], [1.0, 0.0]),
    ];
    let (residuals, _) = combiner.combine_residuals(&partials).unwrap();
    // Each partial is scaled by its own peak weight (2), and the sum by the
    // global peak weight (4).
    assert_abs_diff_eq!(residuals[0].data[(0, 0, 0)], 2.0);
    assert_abs_diff_eq!(residuals[0].data[(0, 0, 1)], 3.0);
}

#[test]
fn test_model_comes_from_first_partial() {
    let mut a = partial([1.0, 1.0], [1.0, 1.0], [1.0, 0.0]);
    let b = partial([1.0, 1.0], [1.0, 1.0], [1.0, 0.0]);
    a.models[0] = image([0.5, 0.0]);
    let combined = ImageCombiner::default().combine(&[a, b]).unwrap();
    assert_eq!(combined.models[0], image([0.5, 0.0]));
}

#[test]
fn test_partials_are_regridded_onto_the_first() {
    let a = partial([1.0, 2.0], [1.0, 1.0], [1.0, 0.0]);
    // The same sky, but on a grid whose reference pixel is one to the right,
    // so every pixel moves one to the right.
    let mut b = partial([0.0, 1.0], [1.0, 1.0], [1.0, 0.0]);
    let mut shifted = grid();
    shifted.ref_pixel[0] += 1.0;
    for images in b.kinds_mut() {
        for image in images.iter_mut() {
            image.grid = shifted;
        }
    }
    let combined = ImageCombiner::default().combine(&[a, b]).unwrap();
    assert!(combined.residuals[0].grid.same_as(&grid()));
    assert_abs_diff_eq!(combined.residuals[0].data[(0, 0, 0)], 1.0);
}

#[test]
fn test_grid_mismatch() {
    let a = partial([1.0, 2.0], [1.0, 1.0], [1.0, 0.0]);
    let mut b = a.clone();
    b.sumwts[0].grid.cell = [f64::NAN, 1e-4];
    let result = ImageCombiner::default().combine(&[a, b]);
    assert!(matches!(
        result,
        Err(CombineError::GridMismatch { index: 1, .. })
    ));
}

#[test]
fn test_term_count_mismatch() {
    let a = partial([1.0, 2.0], [1.0, 1.0], [1.0, 0.0]);
    let mut b = a.clone();
    b.psfs.push(image([0.0, 0.0]));
    let result = ImageCombiner::default().combine(&[a, b]);
    assert!(matches!(
        result,
        Err(CombineError::TermCount {
            index: 1,
            kind: "psf",
            expected: 1,
            got: 2
        })
    ));
    assert!(matches!(
        ImageCombiner::default().combine(&[]),
        Err(CombineError::NoPartials)
    ));
}

#[test]
fn test_taylor_terms() {
    let g = grid();
    let mut a = ImageSet::zeros(g, 2);
    let mut b = ImageSet::zeros(g, 2);
    assert_eq!(a.psfs.len(), 3);
    for (set, value) in [(&mut a, 1.0), (&mut b, 3.0)] {
        for t in 0..2 {
            set.residuals[t] = image([value * (t + 1) as f32, 0.0]);
            set.sumwts[t] = image([1.0, 1.0]);
        }
        for psf in set.psfs.iter_mut() {
            *psf = image([value, value]);
        }
    }
    let combined = ImageCombiner::default().combine(&[a, b]).unwrap();
    assert_eq!(combined.nterms(), 2);
    assert_abs_diff_eq!(combined.residuals[0].data[(0, 0, 0)], 2.0);
    assert_abs_diff_eq!(combined.residuals[1].data[(0, 0, 0)], 4.0);
    assert_abs_diff_eq!(combined.sumwts[1].data[(0, 0, 0)], 2.0);
    for psf in &combined.psfs {
        assert_abs_diff_eq!(psf.data[(0, 0, 1)], 2.0);
    }
}

#[test]
fn test_average_and_weighted_average() {
    let combiner = ImageCombiner::default();
    let avg = combiner
        .average(&[image([1.0, 0.0]), image([3.0, 2.0])])
        .unwrap();
    assert_eq!(avg.data, array![[[2.0f32, 1.0]]]);

    let images = [image([1.0, 5.0]), image([4.0, 5.0])];
    let weights = [image([2.0, 0.01]), image([1.0, 0.01])];
    let wavg = combiner.weighted_average(&images, &weights).unwrap();
    assert_abs_diff_eq!(wavg.data[(0, 0, 0)], 2.0);
    assert_eq!(wavg.data[(0, 0, 1)], 0.0);

    // A single image comes back untouched.
    let single = combiner
        .weighted_average(&images[..1], &weights[..1])
        .unwrap();
    assert_eq!(single, images[0]);

    assert!(matches!(
        combiner.weighted_average(&images, &weights[..1]),
        Err(CombineError::WeightCount {
            images: 2,
            weights: 1
        })
    ));
}

#[test]
fn test_scatter_model() {
    let model = image([1.0, 1.0]);
    let sumwt = image([4.0, 0.2]);
    let pbcorr = ImageCombiner {
        pb_limit: 0.1,
        dopbcorr: true,
    };
    assert_eq!(pbcorr.scatter_model(&model, &sumwt).unwrap(), model);

    let no_pbcorr = ImageCombiner {
        dopbcorr: false,
        ..pbcorr
    };
    let scattered = no_pbcorr.scatter_model(&model, &image([2.0, 4.0])).unwrap();
    assert_abs_diff_eq!(scattered.data[(0, 0, 0)], 2.0);
    assert_abs_diff_eq!(scattered.data[(0, 0, 1)], 1.0);
    let scattered = no_pbcorr.scatter_model(&model, &sumwt).unwrap();
    assert_eq!(scattered.data[(0, 0, 1)], 0.0);
}

#[test]
fn test_spectral_index() {
    let tt0 = image([2.0, 0.0005]);
    let tt1 = image([1.0, 1.0]);
    let tt2 = image([0.5, 1.0]);
    let (alpha, beta) = spectral_index(&[tt0.clone(), tt1.clone(), tt2]).unwrap();
    assert_abs_diff_eq!(alpha.data[(0, 0, 0)], 0.5);
    assert_eq!(alpha.data[(0, 0, 1)], 0.0);
    let beta = beta.unwrap();
    // 0.25 - 0.5 * (0.5 - 1) / 2
    assert_abs_diff_eq!(beta.data[(0, 0, 0)], 0.375);
    assert_eq!(beta.data[(0, 0, 1)], 0.0);

    let (_, beta) = spectral_index(&[tt0.clone(), tt1]).unwrap();
    assert!(beta.is_none());
    assert!(matches!(
        spectral_index(&[tt0]),
        Err(CombineError::TooFewTerms(1))
    ));
}

#[test]
fn test_image_set_store_round_trip_names() {
    let store = MemoryImageStore::new();
    let set = ImageSet::zeros(grid(), 2);
    set.write(&store, "test").unwrap();
    assert_eq!(
        store.list("test").unwrap(),
        vec![
            "test.model.tt0",
            "test.model.tt1",
            "test.psf.tt0",
            "test.psf.tt1",
            "test.psf.tt2",
            "test.residual.tt0",
            "test.residual.tt1",
            "test.sumwt.tt0",
            "test.sumwt.tt1",
        ]
    );
    assert_eq!(ImageSet::read(&store, "test", 2).unwrap(), set);
    ImageSet::delete(&store, "test", 2).unwrap();
    assert!(store.list("test").unwrap().is_empty());
}
