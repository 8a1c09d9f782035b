use assert_cmd::Command;
use predicates::prelude::*;
use std::{fs, path::Path};
use tempfile::tempdir;

fn qm(config: &Path, status: &Path) -> Command {
    let mut cmd = Command::cargo_bin("qm").expect("binary builds");
    cmd.arg("-c").arg(config).arg("-s").arg(status);
    cmd
}

fn write_fleet(dir: &Path) -> std::path::PathBuf {
    let config = dir.join("qm.cfg");
    fs::write(
        &config,
        format!(
            r#"
[group:core]
type = cmd
command = /bin/sleep 30
startWait = 0.1
stopWait = 0.1
dataPath = {0}/data
logPath = {0}/log

[[core.a]]

[[core.b]]
requires = a
"#,
            dir.display()
        ),
    )
    .unwrap();
    config
}

#[test]
fn info_lists_configured_components() {
    let dir = tempdir().unwrap();
    let config = write_fleet(dir.path());
    let status = dir.path().join("qm.status");

    qm(&config, &status)
        .arg("info")
        .assert()
        .success()
        .stdout(predicate::str::contains("core.a"))
        .stdout(predicate::str::contains("core.b"))
        .stdout(predicate::str::contains("STOPPED"));
}

#[test]
fn info_filter_hides_non_matching_statuses() {
    let dir = tempdir().unwrap();
    let config = write_fleet(dir.path());
    let status = dir.path().join("qm.status");

    qm(&config, &status)
        .args(["info", "-F", "RUNNING"])
        .assert()
        .success()
        .stdout(predicate::str::contains("core.a").not());
}

#[test]
fn info_emits_json_when_requested() {
    let dir = tempdir().unwrap();
    let config = write_fleet(dir.path());
    let status = dir.path().join("qm.status");

    qm(&config, &status)
        .args(["info", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"uid\": \"core.a\""))
        .stdout(predicate::str::contains("\"status\": \"STOPPED\""));
}

#[test]
fn unknown_selector_is_fatal() {
    let dir = tempdir().unwrap();
    let config = write_fleet(dir.path());
    let status = dir.path().join("qm.status");

    qm(&config, &status)
        .args(["start", "nosuch"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unmanaged group"));
}

#[test]
fn missing_config_is_fatal() {
    let dir = tempdir().unwrap();
    let status = dir.path().join("qm.status");

    qm(&dir.path().join("absent.cfg"), &status)
        .arg("info")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Failed to read config file"));
}

#[test]
fn start_info_stop_round_trip() {
    let dir = tempdir().unwrap();
    let config = write_fleet(dir.path());
    let status = dir.path().join("qm.status");

    qm(&config, &status)
        .args(["start", "core.a"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Starting components..."))
        .stdout(predicate::str::contains("OK"));

    qm(&config, &status)
        .args(["info", "-F", "RUNNING#DISTURBED"])
        .assert()
        .success()
        .stdout(predicate::str::contains("core.a"));

    qm(&config, &status)
        .args(["stop", "*"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Stopping components..."));

    qm(&config, &status)
        .args(["info", "-F", "RUNNING"])
        .assert()
        .success()
        .stdout(predicate::str::contains("core.a").not());
}

#[test]
fn failed_component_start_exits_nonzero() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("qm.cfg");
    fs::write(
        &config,
        format!(
            r#"
[group:core]
[[core.broken]]
type = cmd
command = /nonexistent/binary-for-sure
startWait = 0.1
dataPath = {0}/data
logPath = {0}/log
"#,
            dir.path().display()
        ),
    )
    .unwrap();
    let status = dir.path().join("qm.status");

    qm(&config, &status)
        .args(["start", "core.broken"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Failed to start: core.broken"));
}

#[test]
fn dependants_are_started_in_order_via_group_selector() {
    let dir = tempdir().unwrap();
    let config = write_fleet(dir.path());
    let status = dir.path().join("qm.status");

    let assert = qm(&config, &status)
        .args(["start", "core"])
        .assert()
        .success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).into_owned();
    let a_position = stdout.find("core.a").expect("core.a reported");
    let b_position = stdout.find("core.b").expect("core.b reported");
    assert!(a_position < b_position, "core.a must be reported first");

    qm(&config, &status).args(["kill", "*"]).assert().success();
}
