//! Exit-status contract of the `arena-autopilot` binary

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn command(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("arena-autopilot").unwrap();
    cmd.env_clear()
        .env("RUST_LOG", "info")
        .arg("--log-dir")
        .arg(dir.path().join("logs"));
    cmd
}

#[test]
fn test_missing_configuration_exits_with_failure() {
    let dir = TempDir::new().unwrap();

    command(&dir)
        .arg("--env-file")
        .arg(dir.path().join("does-not-exist.env"))
        .arg("--once")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("MOLT_AGENT_ID is not set"))
        .stdout(predicate::str::contains("MOLT_API_KEY is not set"));

    assert!(dir.path().join("logs").join("arena-autopilot.log").exists());
}

#[test]
fn test_malformed_api_key_from_env_file_exits_with_failure() {
    let dir = TempDir::new().unwrap();
    let env_file = dir.path().join(".env");
    fs::write(&env_file, "MOLT_AGENT_ID=agent-1\nMOLT_API_KEY=sk_test_123\n").unwrap();

    command(&dir)
        .arg("--env-file")
        .arg(&env_file)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("must start with 'pk_live_'"));
}

#[test]
fn test_non_numeric_delay_exits_with_failure() {
    let dir = TempDir::new().unwrap();

    command(&dir)
        .arg("--env-file")
        .arg(dir.path().join("missing.env"))
        .env("MOLT_AGENT_ID", "agent-1")
        .env("MOLT_API_KEY", "pk_live_0123456789abcdef")
        .env("MOLT_DELAY_SECONDS", "ten")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("MOLT_DELAY_SECONDS"));
}

#[test]
fn test_help_lists_flags() {
    Command::cargo_bin("arena-autopilot")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--once"))
        .stdout(predicate::str::contains("--env-file"));
}
