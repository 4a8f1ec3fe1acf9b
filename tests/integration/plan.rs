// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use tempfile::TempDir;

use crate::{get_cmd_output, hyperimager, make_dataset, make_file_in_dir};

#[test]
fn test_plan_channels() {
    let dir = TempDir::new().unwrap();
    let dataset = make_dataset(dir.path());
    let output = dir.path().join("plan.json");

    let cmd = hyperimager()
        .args([
            "plan",
            "--no-progress-bars",
            "-d",
            &dataset.display().to_string(),
            "-n",
            "3",
            "-o",
            &output.display().to_string(),
        ])
        .ok();
    assert!(cmd.is_ok(), "{:?}", get_cmd_output(cmd));
    let (stdout, _) = get_cmd_output(cmd);
    assert!(stdout.contains("Partition plan"), "{stdout}");
    assert!(stdout.contains("Worker 2: '1:2~3'"), "{stdout}");

    let plan: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(plan["assignments"].as_array().unwrap().len(), 3);
    assert_eq!(plan["assignments"][0]["selection"], "0:0~2");
    assert_eq!(plan["assignments"][1]["selection"], "0:3~3,1:0~1");
}

#[test]
fn test_plan_from_arg_file_and_save_toml() {
    let dir = TempDir::new().unwrap();
    let dataset = make_dataset(dir.path());
    let arg_file = make_file_in_dir(
        "args.toml",
        dir.path(),
        &format!(
            "dataset = \"{}\"\nmode = \"cube\"\nnchan = 4\nchanchunk = 3\nchan_width = \"1MHz\"\n",
            dataset.display()
        ),
    );
    let saved = dir.path().join("saved.toml");

    let cmd = hyperimager()
        .args([
            "plan",
            &arg_file.display().to_string(),
            "--chanchunk",
            "2",
            "--save-toml",
            &saved.display().to_string(),
        ])
        .ok();
    assert!(cmd.is_ok(), "{:?}", get_cmd_output(cmd));
    let (stdout, _) = get_cmd_output(cmd);
    assert!(stdout.contains("Chunk 1: channels 2~3"), "{stdout}");

    let saved: toml::Value = toml::from_str(&std::fs::read_to_string(saved).unwrap()).unwrap();
    assert_eq!(saved["chanchunk"].as_integer(), Some(2));
    assert_eq!(saved["nchan"].as_integer(), Some(4));
}

#[test]
fn test_plan_dry_run() {
    let dir = TempDir::new().unwrap();
    let dataset = make_dataset(dir.path());
    let output = dir.path().join("plan.json");

    let cmd = hyperimager()
        .args([
            "plan",
            "-d",
            &dataset.display().to_string(),
            "-o",
            &output.display().to_string(),
            "--dry-run",
        ])
        .ok();
    assert!(cmd.is_ok(), "{:?}", get_cmd_output(cmd));
    assert!(!output.exists());
}

#[test]
fn test_plan_empty_selection_fails() {
    let dir = TempDir::new().unwrap();
    let dataset = make_dataset(dir.path());

    let cmd = hyperimager()
        .args([
            "plan",
            "-d",
            &dataset.display().to_string(),
            "--begin-freq",
            "1GHz",
        ])
        .ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.contains("No channels or times matched"), "{stderr}");
}
