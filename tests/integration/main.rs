// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Integration tests.
//!
//! Some help for laying out these tests was taken from:
//! https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html

mod images;
mod plan;

use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
    process::Output,
    str::from_utf8,
};

use assert_cmd::{output::OutputError, Command};

fn hyperimager() -> Command {
    Command::cargo_bin("hyperimager").unwrap()
}

fn get_cmd_output(result: Result<Output, OutputError>) -> (String, String) {
    let output = match result {
        Ok(o) => o,
        Err(o) => o.as_output().unwrap().clone(),
    };
    (
        from_utf8(&output.stdout).unwrap().to_string(),
        from_utf8(&output.stderr).unwrap().to_string(),
    )
}

fn make_file_in_dir<T: AsRef<Path>, U: AsRef<Path>>(
    filename: T,
    dir: U,
    contents: &str,
) -> PathBuf {
    let path = dir.as_ref().join(filename);
    let mut f = File::create(&path).expect("couldn't make file");
    f.write_all(contents.as_bytes()).unwrap();
    path
}

/// A dataset of two spectral windows, each of four 1 MHz channels starting
/// at 100 MHz, observed for two minutes.
fn make_dataset<T: AsRef<Path>>(dir: T) -> PathBuf {
    make_file_in_dir(
        "dataset.toml",
        dir,
        indoc::indoc! {r#"
            path = "/data/obs.ms"

            [[spectral_windows]]
            id = 0
            freqs = [100.0e6, 101.0e6, 102.0e6, 103.0e6]

            [[spectral_windows]]
            id = 1
            freqs = [104.0e6, 105.0e6, 106.0e6, 107.0e6]

            [[observations]]
            id = 0
            start_gps = 1090008640.0
            end_gps = 1090008760.0
        "#},
    )
}

#[test]
fn test_help() {
    let cmd = hyperimager().arg("--help").ok();
    assert!(cmd.is_ok());
    let (stdout, _) = get_cmd_output(cmd);
    for subcommand in ["plan", "combine", "make-mask"] {
        assert!(stdout.contains(subcommand), "no {subcommand} in help");
    }
}

#[test]
fn test_no_subcommand_is_an_error() {
    let cmd = hyperimager().ok();
    assert!(cmd.is_err());
}
