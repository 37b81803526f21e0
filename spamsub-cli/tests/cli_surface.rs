use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use serde_json::Value;
use tempfile::TempDir;

fn spamsub_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("spamsub"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env_remove("RUST_LOG")
        .env_remove("SPAMSUB_GITHUB_TOKEN");
    cmd
}

fn init(home: &TempDir) {
    spamsub_cmd(home.path())
        .arg("init")
        .assert()
        .success()
        .stdout(contains("Wrote config"));
}

#[test]
fn init_is_idempotent_unless_forced() {
    let home = TempDir::new().expect("home");
    init(&home);
    assert!(home.path().join(".spamsub/config.yaml").exists());

    spamsub_cmd(home.path())
        .arg("init")
        .assert()
        .success()
        .stdout(contains("already exists"));

    spamsub_cmd(home.path())
        .args(["init", "--force"])
        .assert()
        .success()
        .stdout(contains("Wrote config"));
}

#[test]
fn commands_need_a_config() {
    let home = TempDir::new().expect("home");
    spamsub_cmd(home.path())
        .arg("status")
        .assert()
        .failure()
        .stderr(contains("spamsub init"));
}

#[test]
fn status_json_reports_empty_store_and_missing_mirror() {
    let home = TempDir::new().expect("home");
    init(&home);

    let assert = spamsub_cmd(home.path())
        .args(["status", "--json"])
        .assert()
        .success();
    let report: Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("status is JSON");

    assert_eq!(report["address_count"], 0);
    assert_eq!(report["pending"], Value::Null);
    assert_eq!(report["gate_open"], false);
    assert_eq!(report["last_sync_age"], "never");
    assert_eq!(report["sync_stale"], true);
    assert!(report["mirror_error"].is_string(), "repo dir does not exist yet");
}

#[test]
fn invalid_addresses_are_rejected_before_touching_the_engine() {
    let home = TempDir::new().expect("home");

    spamsub_cmd(home.path())
        .args(["submit", "someone@spam.example"])
        .assert()
        .failure()
        .stderr(contains("local part"));

    spamsub_cmd(home.path())
        .args(["submit", "not a domain"])
        .assert()
        .failure()
        .stderr(contains("is not a domain"));

    assert!(!home.path().join(".spamsub").exists());
}

#[test]
fn submit_fails_when_the_mirror_is_unreachable() {
    let home = TempDir::new().expect("home");
    init(&home);

    spamsub_cmd(home.path())
        .args(["submit", "spam.example"])
        .assert()
        .failure()
        .stderr(contains("failed to submit 'spam.example'"));
}

#[test]
fn export_writes_the_rendered_list() {
    let home = TempDir::new().expect("home");
    init(&home);
    let out = home.path().join("preview.txt");

    spamsub_cmd(home.path())
        .args(["export", "--output"])
        .arg(&out)
        .assert()
        .success()
        .stderr(contains("exported to"));

    let rendered = fs::read_to_string(&out).expect("export file");
    assert!(!rendered.contains("@"), "empty store renders no addresses: {rendered}");
}

#[test]
fn daemon_status_without_daemon_reports_not_running() {
    let home = TempDir::new().expect("home");

    let assert = spamsub_cmd(home.path())
        .args(["daemon", "status"])
        .assert()
        .success();
    let payload: Value = serde_json::from_slice(&assert.get_output().stdout).expect("JSON");
    assert_eq!(payload["running"], false);

    spamsub_cmd(home.path())
        .args(["daemon", "stop"])
        .assert()
        .success()
        .stdout(contains("not running"));
}
