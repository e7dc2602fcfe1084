use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use predicates::str::contains;
use tempfile::tempdir;

fn mnpp(home: &std::path::Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("mnpp"));
    cmd.env("HOME", home)
        .env_remove("RUST_LOG")
        .current_dir(home);
    cmd
}

#[test]
fn prefs_set_rejects_unsupported_php_version() {
    let temp = tempdir().expect("failed to create tempdir");

    mnpp(temp.path())
        .args(["prefs", "set", "phpVersion", "99"])
        .assert()
        .failure()
        .stderr(contains("99"));

    mnpp(temp.path())
        .args(["prefs", "get", "phpVersion"])
        .assert()
        .success()
        .stdout(contains("53"));
}

#[test]
fn prefs_set_then_get_round_trips() {
    let temp = tempdir().expect("failed to create tempdir");

    mnpp(temp.path())
        .args(["prefs", "set", "phpVersion", "52"])
        .assert()
        .success()
        .stdout(contains("phpVersion=52"));

    mnpp(temp.path())
        .args(["prefs", "get", "phpVersion"])
        .assert()
        .success()
        .stdout(predicate::str::diff("52\n"));

    let stored = fs::read_to_string(temp.path().join(".local/share/mnpp/preferences.json"))
        .expect("preferences written");
    assert!(stored.contains("\"phpVersion\": \"52\""));
}

#[test]
fn prefs_unknown_key_fails() {
    let temp = tempdir().expect("failed to create tempdir");

    mnpp(temp.path())
        .args(["prefs", "get", "rubyVersion"])
        .assert()
        .failure()
        .stderr(contains("rubyVersion"));
}

#[test]
fn status_without_supervisor_lists_configured_services_as_stopped() {
    let temp = tempdir().expect("failed to create tempdir");
    let config_path = temp.path().join("stack.yaml");
    fs::write(
        &config_path,
        r#"version: "1"
services:
  - name: web
    executable: sleep
    args: ["30"]
  - name: php
    executable: sleep
    args: ["30"]
"#,
    )
    .expect("failed to write config");

    mnpp(temp.path())
        .args(["status", "--no-color", "--config"])
        .arg(&config_path)
        .assert()
        .success()
        .stdout(contains("web").and(contains("php")).and(contains("stopped")));

    mnpp(temp.path())
        .args(["status", "--json", "--config"])
        .arg(&config_path)
        .assert()
        .success()
        .stdout(contains(r#""state": "stopped""#));

    mnpp(temp.path())
        .args(["status", "mail", "--config"])
        .arg(&config_path)
        .assert()
        .failure();
}

#[test]
fn start_without_supervisor_fails_but_stop_is_harmless() {
    let temp = tempdir().expect("failed to create tempdir");

    mnpp(temp.path())
        .arg("start")
        .assert()
        .failure()
        .stderr(contains("mnpp run"));

    mnpp(temp.path()).arg("stop").assert().success();
    mnpp(temp.path()).arg("exit").assert().success();
}

#[test]
fn stale_pid_file_is_cleaned_up() {
    let temp = tempdir().expect("failed to create tempdir");
    let runtime_dir = temp.path().join(".local/share/mnpp");
    fs::create_dir_all(&runtime_dir).expect("failed to create runtime dir");
    let pid_file = runtime_dir.join("mnpp.pid");
    fs::write(&pid_file, "999999").expect("failed to write stale pid");

    mnpp(temp.path()).arg("stop").assert().success();
    assert!(!pid_file.exists());
}

#[test]
fn logs_prints_the_tail_of_a_service_log() {
    let temp = tempdir().expect("failed to create tempdir");
    let log_dir = temp.path().join(".local/share/mnpp/logs");
    fs::create_dir_all(&log_dir).expect("failed to create log dir");
    fs::write(log_dir.join("web_stdout.log"), "one\ntwo\nthree\n").expect("write log");

    mnpp(temp.path())
        .args(["logs", "web", "--kind", "stdout", "--lines", "2"])
        .assert()
        .success()
        .stdout(predicate::str::diff("two\nthree\n"));

    mnpp(temp.path())
        .args(["logs", "database"])
        .assert()
        .failure();
}
