use assert_cmd::Command;
use std::fs;
use tempfile::tempdir;

// Basic CLI surface: help, version, and configuration error handling.

#[test]
fn help_lists_the_main_flags() {
    let mut cmd = Command::cargo_bin("testpool").unwrap();
    let assert = cmd.arg("--help").assert().success();
    let output = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert!(output.contains("--config"));
    assert!(output.contains("--manifest"));
    assert!(output.contains("--filter"));
    assert!(output.contains("--retry"));
    assert!(output.contains("--dry-run"));
    assert!(output.contains("--list"));
    assert!(output.contains("EXIT CODES"));
}

#[test]
fn version_flag_prints_the_package_version() {
    let mut cmd = Command::cargo_bin("testpool").unwrap();
    let assert = cmd.arg("--version").assert().success();
    let output = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert!(output.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn missing_config_file_exits_with_configuration_failure() {
    let mut cmd = Command::cargo_bin("testpool").unwrap();
    cmd.arg("--config")
        .arg("does-not-exist.toml")
        .assert()
        .code(2);
}

#[test]
fn config_without_pools_exits_with_configuration_failure() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("testpool.toml");
    fs::write(&config_path, "[run]\nretry_limit = 1\n").unwrap();

    let mut cmd = Command::cargo_bin("testpool").unwrap();
    cmd.arg("--config")
        .arg(&config_path)
        .arg("--dry-run")
        .assert()
        .code(2);
}

#[test]
fn invalid_filter_regex_fails_scheduling() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("testpool.toml");
    let manifest_path = temp_dir.path().join("tests.toml");
    fs::write(
        &config_path,
        r#"
[[pools]]
name = "default"

[[pools.devices]]
serial = "local-1"
"#,
    )
    .unwrap();
    fs::write(
        &manifest_path,
        r#"
[[tests]]
class = "T"
method = "m"
"#,
    )
    .unwrap();

    let mut cmd = Command::cargo_bin("testpool").unwrap();
    cmd.arg("--config")
        .arg(&config_path)
        .arg("--manifest")
        .arg(&manifest_path)
        .arg("--filter")
        .arg("([")
        .arg("--dry-run")
        .assert()
        .code(2);
}
