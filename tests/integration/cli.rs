//! CLI surface checks through the real binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn upswitch() -> Command {
    let mut cmd = Command::cargo_bin("upswitch").expect("binary builds");
    // Isolate from any daemon environment on the host.
    for var in [
        "DAEMON_HOME",
        "DAEMON_NAME",
        "DAEMON_DATA_DIR",
        "DAEMON_ALLOW_DOWNLOAD_BINARIES",
        "DAEMON_RESTART_AFTER_UPGRADE",
        "UPSWITCH_SUPERVISED",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn version_prints_build_metadata() {
    upswitch()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("upswitch"))
        .stdout(predicate::str::contains("version"));
}

#[test]
fn run_requires_configuration() {
    upswitch()
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--home"));
}

#[test]
fn run_accepts_environment_configuration() {
    // A home without a genesis binary: configuration parses, supervision
    // then fails to resolve a binary.
    let home = TempDir::new().unwrap();
    upswitch()
        .arg("run")
        .env("DAEMON_HOME", home.path())
        .env("DAEMON_NAME", "autod")
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn nested_supervision_is_refused() {
    let home = TempDir::new().unwrap();
    upswitch()
        .arg("run")
        .env("DAEMON_HOME", home.path())
        .env("DAEMON_NAME", "autod")
        .env("UPSWITCH_SUPERVISED", "1")
        .assert()
        .failure()
        .stderr(predicate::str::contains("supervision"));
}
