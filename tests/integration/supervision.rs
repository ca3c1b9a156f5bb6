//! End-to-end supervision over shell-script fixture daemons.
#![cfg(unix)]

use crate::common::TestHome;
use std::fs;
use upswitch::process::{launch_process, supervise};

const GENESIS_TRIGGER: &str = r#"echo Genesis "$@"
echo 'UPGRADE "chain2" NEEDED at height: 49: '
echo 'panic: UPGRADE "chain2" NEEDED at height: 49: '
"#;

const CHAIN2: &str = r#"echo 'Chain 2 is live!'
echo "Args: $@"
echo 'Finished successfully'
"#;

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(ToString::to_string).collect()
}

#[tokio::test]
async fn upgrade_swaps_binary_and_restart_runs_it() {
    let home = TestHome::new();
    let cfg = home.config("autod");
    home.install_genesis_script(&cfg, GENESIS_TRIGGER);
    home.install_upgrade_script(&cfg, "chain2", CHAIN2);

    // First run: the genesis binary announces and confirms an upgrade.
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let needs_upgrade = launch_process(&cfg, &args(&["foo", "bar", "1234"]), &mut stdout, &mut stderr)
        .await
        .unwrap();
    assert!(needs_upgrade);
    assert_eq!(
        String::from_utf8(stdout).unwrap(),
        "Genesis foo bar 1234\n\
         UPGRADE \"chain2\" NEEDED at height: 49: \n\
         panic: UPGRADE \"chain2\" NEEDED at height: 49: \n"
    );
    assert_eq!(stderr, b"");
    assert_eq!(
        fs::read_link(cfg.current_link()).unwrap(),
        cfg.upgrade_dir("chain2")
    );

    // Second run executes the swapped binary and ends without a signal.
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let needs_upgrade =
        launch_process(&cfg, &args(&["second", "run"]), &mut stdout, &mut stderr)
            .await
            .unwrap();
    assert!(!needs_upgrade);
    assert_eq!(
        String::from_utf8(stdout).unwrap(),
        "Chain 2 is live!\nArgs: second run\nFinished successfully\n"
    );
    assert_eq!(
        fs::read_link(cfg.current_link()).unwrap(),
        cfg.upgrade_dir("chain2")
    );
}

#[tokio::test]
async fn supervise_restarts_into_upgraded_binary() {
    let home = TestHome::new();
    let mut cfg = home.config("autod");
    cfg.restart_after_upgrade = true;
    home.install_genesis_script(&cfg, GENESIS_TRIGGER);
    home.install_upgrade_script(&cfg, "chain2", CHAIN2);

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    supervise(&cfg, &args(&["run"]), &mut stdout, &mut stderr)
        .await
        .unwrap();

    let output = String::from_utf8(stdout).unwrap();
    assert!(output.contains("Genesis run"));
    assert!(output.contains("Chain 2 is live!"));
    assert!(output.contains("Finished successfully"));
}

#[tokio::test]
async fn supervise_stops_after_upgrade_when_restart_disabled() {
    let home = TestHome::new();
    let cfg = home.config("autod");
    home.install_genesis_script(&cfg, GENESIS_TRIGGER);
    home.install_upgrade_script(&cfg, "chain2", CHAIN2);

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    supervise(&cfg, &args(&[]), &mut stdout, &mut stderr)
        .await
        .unwrap();

    // The swap happened, but the new binary was not run.
    let output = String::from_utf8(stdout).unwrap();
    assert!(!output.contains("Chain 2 is live!"));
    assert_eq!(
        fs::read_link(cfg.current_link()).unwrap(),
        cfg.upgrade_dir("chain2")
    );
}

#[tokio::test]
async fn backup_runs_before_the_swap() {
    let home = TestHome::new();
    let cfg = home.with_data_dir(&home.config("autod"));
    home.install_genesis_script(&cfg, GENESIS_TRIGGER);
    home.install_upgrade_script(&cfg, "chain2", CHAIN2);

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    assert!(
        launch_process(&cfg, &args(&[]), &mut stdout, &mut stderr)
            .await
            .unwrap()
    );

    let backup = cfg.backup_dir("chain2");
    assert_eq!(
        fs::read_to_string(backup.join("data/application.db")).unwrap(),
        "test\n"
    );
    assert!(backup.join(".keep").is_file());
}

#[tokio::test]
async fn clean_exit_without_signal_ends_supervision() {
    let home = TestHome::new();
    let cfg = home.config("autod");
    home.install_genesis_script(&cfg, "echo 'nothing to see'\n");

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let needs_upgrade = launch_process(&cfg, &args(&[]), &mut stdout, &mut stderr)
        .await
        .unwrap();
    assert!(!needs_upgrade);
    assert_eq!(stdout, b"nothing to see\n");
}

#[tokio::test]
async fn nonzero_exit_surfaces_as_error() {
    let home = TestHome::new();
    let cfg = home.config("autod");
    home.install_genesis_script(&cfg, "echo 'going down'\nexit 3\n");

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let err = launch_process(&cfg, &args(&[]), &mut stdout, &mut stderr)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("exited"));
    assert_eq!(stdout, b"going down\n");
}

#[tokio::test]
async fn stderr_is_forwarded_but_never_scanned() {
    let home = TestHome::new();
    let cfg = home.config("autod");
    home.install_genesis_script(
        &cfg,
        r#"echo 'UPGRADE "nope" NEEDED at height: 1: ' >&2
echo 'panic: UPGRADE "nope" NEEDED at height: 1: ' >&2
"#,
    );

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let needs_upgrade = launch_process(&cfg, &args(&[]), &mut stdout, &mut stderr)
        .await
        .unwrap();

    // Upgrade notices on stderr do not count.
    assert!(!needs_upgrade);
    assert_eq!(stdout, b"");
    assert_eq!(
        String::from_utf8(stderr).unwrap(),
        "UPGRADE \"nope\" NEEDED at height: 1: \npanic: UPGRADE \"nope\" NEEDED at height: 1: \n"
    );
    assert_eq!(
        fs::read_link(cfg.current_link()).unwrap(),
        cfg.genesis_dir()
    );
}

#[tokio::test]
async fn spawn_failure_is_an_error() {
    let home = TestHome::new();
    let cfg = home.config("autod");
    // No genesis binary installed at all.

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    assert!(
        launch_process(&cfg, &args(&[]), &mut stdout, &mut stderr)
            .await
            .is_err()
    );
}
