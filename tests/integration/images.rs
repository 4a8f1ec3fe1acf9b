// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use approx::assert_abs_diff_eq;
use tempfile::TempDir;

use hyperimager::{
    image::{FitsImageStore, ImageKind},
    Image, ImageGrid, ImageSet, ImageStore,
};

use crate::{get_cmd_output, hyperimager};

fn grid() -> ImageGrid {
    ImageGrid::new(6, 6, 1, 1e-4, 150e6, 1e6)
}

#[test]
fn test_combine_and_mask() {
    let dir = TempDir::new().unwrap();
    let store = FitsImageStore::new(dir.path()).unwrap();
    for (i, (value, weight)) in [(1.0, 1.0), (4.0, 2.0)].into_iter().enumerate() {
        let mut set = ImageSet::zeros(grid(), 1);
        set.residuals[0] = Image::filled(grid(), value);
        set.sumwts[0] = Image::filled(grid(), weight);
        set.psfs[0] = Image::filled(grid(), 1.0);
        set.write(&store, &format!("img.Temp{i}")).unwrap();
    }
    let image_dir = dir.path().display().to_string();

    let cmd = hyperimager()
        .args([
            "combine",
            "-d",
            &image_dir,
            "-p",
            "img.Temp0",
            "img.Temp1",
            "-o",
            "img",
        ])
        .ok();
    assert!(cmd.is_ok(), "{:?}", get_cmd_output(cmd));
    let residual = store.read(&ImageKind::Residual.plain_name("img")).unwrap();
    // (1 * 1 + 4 * 2) / 3
    assert_abs_diff_eq!(residual.data[(0, 3, 3)], 3.0);

    let cmd = hyperimager()
        .args(["make-mask", "-d", &image_dir, "-t", "img.residual"])
        .ok();
    assert!(cmd.is_ok(), "{:?}", get_cmd_output(cmd));
    let mask = store.read("img.residual.mask").unwrap();
    assert!(mask.grid.same_as(&grid()));
    assert_abs_diff_eq!(mask.data.sum(), 36.0);
}

#[test]
fn test_combine_missing_partial_fails() {
    let dir = TempDir::new().unwrap();
    let cmd = hyperimager()
        .args([
            "combine",
            "-d",
            &dir.path().display().to_string(),
            "-p",
            "nope",
            "-o",
            "img",
        ])
        .ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.contains("doesn't exist"), "{stderr}");
}
