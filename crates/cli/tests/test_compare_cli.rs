use std::fs;

use assert_cmd::Command;
use predicates::str::contains;
use tempfile::tempdir;

#[test]
fn disabled_config_runs_single_mode_with_no_candidates() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("config.json");
    fs::write(&config_path, r#"{"enabled": false, "candidates": []}"#).unwrap();

    Command::cargo_bin("mb-compare")
        .unwrap()
        .arg("--config")
        .arg(&config_path)
        .arg("--question")
        .arg("does this run without any models configured?")
        .arg("--workspace")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(contains("\"mode\":\"single\""))
        .stdout(contains("FEATURE_DISABLED"));
}

#[test]
fn missing_config_file_exits_nonzero_with_error_message() {
    let dir = tempdir().unwrap();
    Command::cargo_bin("mb-compare")
        .unwrap()
        .arg("--config")
        .arg(dir.path().join("missing.json"))
        .arg("--question")
        .arg("hello")
        .assert()
        .failure()
        .stderr(contains("ERROR"));
}
