//! Integration tests for the command line contract.

use {predicates::prelude::*, std::fs, tempfile::tempdir};

fn cli_cmd() -> assert_cmd::Command {
    assert_cmd::cargo::cargo_bin_cmd!("bleota")
}

#[test]
fn help_exits_zero() {
    cli_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("firmware"));
}

#[test]
fn missing_arguments_is_usage_error() {
    cli_cmd()
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Usage"));

    cli_cmd()
        .arg("01:23:45:67:89:ab")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn invalid_address_fails_before_connecting() {
    let dir = tempdir().unwrap();
    let fw = dir.path().join("firmware.bin");
    fs::write(&fw, [0u8; 64]).unwrap();

    cli_cmd()
        .arg("not-an-address")
        .arg(&fw)
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("Invalid Address: not-an-address"))
        .stderr(predicate::str::contains("Invalid Address: not-an-address"));
}

#[test]
fn missing_firmware_fails_before_connecting() {
    let dir = tempdir().unwrap();
    let fw = dir.path().join("missing.bin");

    cli_cmd()
        .arg("01:23:45:67:89:ab")
        .arg(&fw)
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("File not found"))
        .stderr(predicate::str::contains("File not found"));
}

#[test]
fn unreadable_config_is_reported() {
    let dir = tempdir().unwrap();
    let fw = dir.path().join("firmware.bin");
    fs::write(&fw, [0u8; 64]).unwrap();
    let config = dir.path().join("ota.toml");
    fs::write(&config, "scan_timeout_secs = \"soon\"").unwrap();

    cli_cmd()
        .arg("01:23:45:67:89:ab")
        .arg(&fw)
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Failed to load config"));
}
