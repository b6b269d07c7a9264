//! Integration tests for the `portkeep` CLI binary.
//!
//! Each test points `--lock-file` at an absolute path inside its own temp
//! directory. `EngineConfig` joins that path onto the platform's shared
//! coordination root with `Path::join`, and joining an absolute path
//! replaces the base entirely, so this isolates every test's lock file
//! without needing root/admin access to the real shared location.

use assert_cmd::Command;
use predicates::str::contains;
use std::path::PathBuf;

fn command(lock_file: &PathBuf) -> Command {
    let mut cmd = Command::cargo_bin("portkeep").expect("failed to find portkeep binary");
    cmd.arg("--lock-file").arg(lock_file);
    cmd
}

fn isolated_lock_file() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let lock_file = dir.path().join("portLockFile");
    (dir, lock_file)
}

#[test]
fn reserve_runs_a_child_command_with_the_port_in_its_environment() {
    let (_dir, lock_file) = isolated_lock_file();

    command(&lock_file)
        .arg("reserve")
        .arg("--port")
        .arg("18080")
        .arg("--")
        .arg("sh")
        .arg("-c")
        .arg("echo \"child saw $PORTKEEP_PORT\"")
        .assert()
        .success()
        .stdout(contains("reserved port 18080"))
        .stdout(contains("child saw 18080"));
}

#[test]
fn reserve_any_reserves_a_port_outside_the_restricted_ranges() {
    let (_dir, lock_file) = isolated_lock_file();

    command(&lock_file)
        .arg("reserve-any")
        .arg("--")
        .arg("true")
        .assert()
        .success()
        .stdout(contains("reserved port"));
}

#[test]
fn release_probes_and_reports_the_port() {
    let (_dir, lock_file) = isolated_lock_file();

    command(&lock_file)
        .arg("release")
        .arg("--port")
        .arg("18081")
        .assert()
        .success()
        .stdout(contains("released port 18081"));
}

#[test]
fn reserve_rejects_port_zero_as_an_invalid_argument() {
    let (_dir, lock_file) = isolated_lock_file();

    command(&lock_file)
        .arg("reserve")
        .arg("--port")
        .arg("0")
        .assert()
        .failure()
        .code(1);
}

#[test]
fn list_reports_a_stats_snapshot_in_human_and_json_form() {
    let (_dir, lock_file) = isolated_lock_file();

    command(&lock_file)
        .arg("list")
        .assert()
        .success()
        .stdout(contains("reservable:"))
        .stdout(contains("locks held:"));

    command(&lock_file)
        .arg("list")
        .arg("--json")
        .assert()
        .success()
        .stdout(contains("\"reservable_count\""));
}

#[test]
fn reserve_then_release_reuses_the_same_port() {
    let (_dir, lock_file) = isolated_lock_file();

    command(&lock_file)
        .arg("reserve")
        .arg("--port")
        .arg("18082")
        .arg("--")
        .arg("true")
        .assert()
        .success();

    // The previous invocation's child exited and the holding process closed
    // its reservation, so a fresh process should be able to reserve the same
    // port again.
    command(&lock_file)
        .arg("reserve")
        .arg("--port")
        .arg("18082")
        .arg("--")
        .arg("true")
        .assert()
        .success()
        .stdout(contains("reserved port 18082"));
}
