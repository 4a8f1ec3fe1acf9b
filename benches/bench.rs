// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use criterion::*;
use vec1::Vec1;

use hyperimager::{
    partition::plan_channels, Image, ImageCombiner, ImageGrid, ImageSet, SpectralWindow,
};

fn planning(c: &mut Criterion) {
    // 24 coarse channels of 128 fine channels, like a wideband observation.
    let spws = (0..24)
        .map(|id| SpectralWindow {
            id,
            freqs: Vec1::try_from_vec(
                (0..128)
                    .map(|c| 150e6 + ((id * 128 + c) as f64) * 10e3)
                    .collect(),
            )
            .unwrap(),
        })
        .collect::<Vec<_>>();

    c.bench_function("plan 3072 channels over 17 workers", |b| {
        b.iter(|| plan_channels(black_box(&spws), 17, None, true).unwrap())
    });
    c.bench_function("plan 3072 channels over 17 workers, freq range", |b| {
        b.iter(|| plan_channels(black_box(&spws), 17, Some((155e6, 170e6)), true).unwrap())
    });
}

fn combining(c: &mut Criterion) {
    let grid = ImageGrid::new(512, 512, 1, 1e-4, 150e6, 1e6);
    let partials = (0..8)
        .map(|i| {
            let mut set = ImageSet::zeros(grid, 2);
            for image in set.residuals.iter_mut().chain(set.sumwts.iter_mut()) {
                *image = Image::filled(grid, (i + 1) as f32);
            }
            set
        })
        .collect::<Vec<_>>();
    let combiner = ImageCombiner::default();

    c.bench_function("combine 8 partials of 2x512x512", |b| {
        b.iter(|| combiner.combine(black_box(&partials)).unwrap())
    });
    c.bench_function("combine residuals of 8 partials of 2x512x512", |b| {
        b.iter(|| combiner.combine_residuals(black_box(&partials)).unwrap())
    });
}

criterion_group!(benches, planning, combining);
criterion_main!(benches);
