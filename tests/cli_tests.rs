//! Integration tests for the regulador simulator binary
#![allow(deprecated)] // suppress assert_cmd::Command::cargo_bin deprecation in tests

use predicates::prelude::*;
use regulador::config::GovernorConfig;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_default_run_prints_text_report() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("regulador");
    cmd.arg("--frames").arg("240");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("simulated 240 frames"))
        .stdout(predicate::str::contains("world_view_redraw"))
        .stdout(predicate::str::contains("summary"));
}

#[test]
fn test_print_default_config_round_trips() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("regulador");
    cmd.arg("--print-default-config");

    let output = cmd.output().unwrap();
    assert!(output.status.success());
    let text = String::from_utf8(output.stdout).unwrap();
    assert!(text.contains("[throttle]"));

    let parsed = GovernorConfig::from_toml_str(&text).unwrap();
    assert_eq!(parsed, GovernorConfig::default());
}

#[test]
fn test_json_report_is_parseable() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("regulador");
    cmd.arg("-n").arg("120").arg("--format").arg("json");

    let output = cmd.output().unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["frames"], 120);
    assert_eq!(json["call_sites"], 7);
    assert!(json["families"].as_array().unwrap().len() == 2);
    assert!(json.get("last_burst_text").is_none());
}

#[test]
fn test_config_file_disables_throttling() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[throttle]\nenabled = false").unwrap();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("regulador");
    cmd.arg("-c")
        .arg(file.path())
        .arg("--frames")
        .arg("300")
        .arg("--format")
        .arg("json");

    let output = cmd.output().unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    for family in json["families"].as_array().unwrap() {
        assert_eq!(family["skipped"], 0);
    }
}

#[test]
fn test_invalid_config_file_fails() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[window]\ninterval_secs = -3.0").unwrap();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("regulador");
    cmd.arg("--config").arg(file.path());

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Invalid governor config"));
}

#[test]
fn test_missing_config_file_fails() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("regulador");
    cmd.arg("--config").arg("/nonexistent/regulador.toml");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read governor config"));
}

#[test]
fn test_non_positive_frame_time_rejected() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("regulador");
    cmd.arg("--frame-ms").arg("0");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("--frame-ms"));
}
