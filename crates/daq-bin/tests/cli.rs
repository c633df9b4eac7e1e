//! Integration tests for the dose-logger binary
//!
//! Devices point at ports that do not exist, so every meter comes up
//! degraded; no hardware is needed.
//!
//! Run with: cargo test -p daq-bin --test cli

use std::io::Write;
use std::process::Command;

fn dose_logger() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_dose-logger"));
    cmd.env("RUST_LOG", "warn");
    cmd
}

fn config_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

const DEGRADED_DEVICES: &str = r#"
poll_interval_ms = 10

[[devices]]
id = "prm"
type = "prm9000"
port = "/dev/dose-logger-test-prm"

[[devices]]
id = "g20"
type = "radeye_g20"
port = "/dev/dose-logger-test-g20"
"#;

#[test]
fn test_help_lists_subcommands() {
    let output = dose_logger().arg("--help").output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ports"));
    assert!(stdout.contains("identify"));
    assert!(stdout.contains("poll"));
}

#[test]
fn test_identify_reports_degraded_devices() {
    let file = config_file(DEGRADED_DEVICES);
    let output = dose_logger()
        .args(["identify", "--config"])
        .arg(file.path())
        .output()
        .unwrap();
    assert!(output.status.success(), "{:?}", output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("prm\tPRM-9000 Geiger Counter\tunavailable\t"));
    assert!(lines[0].contains("/dev/dose-logger-test-prm"));
    assert!(lines[1].starts_with("g20\tThermo RadEye G20\tunavailable\t"));
}

#[test]
fn test_poll_writes_sentinel_rows() {
    let file = config_file(DEGRADED_DEVICES);
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("dose.csv");

    let output = dose_logger()
        .args(["poll", "--count", "2", "--config"])
        .arg(file.path())
        .arg("--output")
        .arg(&csv_path)
        .output()
        .unwrap();
    assert!(output.status.success(), "{:?}", output);

    let csv = std::fs::read_to_string(&csv_path).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines[0], "device,elapsed_s,dose_rate,unit");
    assert_eq!(lines.len(), 5);
    assert!(lines[1].starts_with("prm,"));
    assert!(lines[1].ends_with(",-1.0,µSv/h"));
    assert!(lines[2].starts_with("g20,"));
    assert!(lines[2].ends_with(",-1.0,nSv/h"));

    // Failed reads are logged as warnings on stderr.
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("device not connected"));
}

#[test]
fn test_unknown_driver_type_fails() {
    let file = config_file(
        r#"
[[devices]]
id = "x"
type = "geiger-2000"
port = "/dev/null"
"#,
    );
    let output = dose_logger()
        .args(["identify", "--config"])
        .arg(file.path())
        .output()
        .unwrap();
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("geiger-2000"));
}

#[test]
fn test_missing_config_fails() {
    let output = dose_logger()
        .args(["poll", "--config", "/nonexistent/dose-logger.toml"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Config file not found"));
}
