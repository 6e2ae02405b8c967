//! End-to-end runs of the flotilla binary
//!
//! Each test works in its own temp directory: feature files are shell
//! scripts run with `--command sh`, the endpoints live in the directory and
//! `XDG_RUNTIME_DIR` points the pid registry there too.

use std::fs;
use std::process::{Command, Output};
use std::time::{Duration, Instant};
use tempfile::{tempdir, TempDir};

fn flotilla(dir: &TempDir) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_flotilla"));
    command
        .current_dir(dir.path())
        .env_clear()
        .env("PATH", std::env::var_os("PATH").unwrap_or_default())
        .env("HOME", dir.path())
        .env("XDG_RUNTIME_DIR", dir.path());
    command
}

fn write_features(dir: &TempDir, features: &[(&str, &str)]) {
    let root = dir.path().join("features");
    fs::create_dir_all(&root).unwrap();
    for (name, script) in features {
        fs::write(root.join(format!("{name}.feature")), script).unwrap();
    }
}

fn run_cucumber(dir: &TempDir, workers: usize) -> Output {
    let dispatch = format!("ipc://{}/dispatch", dir.path().display());
    let sink = format!("ipc://{}/sink", dir.path().display());
    flotilla(dir)
        .args(["cucumber", "-w", &workers.to_string(), "-f", "summary"])
        .args(["--command", "sh"])
        .args(["--dispatch-endpoint", &dispatch, "--sink-endpoint", &sink])
        .output()
        .unwrap()
}

fn assert_cleaned_up(dir: &TempDir) {
    assert!(!dir.path().join("dispatch").exists());
    assert!(!dir.path().join("sink").exists());

    let registry = dir.path().join("flotilla").join("pids.json");
    if let Ok(content) = fs::read_to_string(&registry) {
        let entries: Vec<serde_json::Value> = serde_json::from_str(&content).unwrap();
        assert!(entries.is_empty(), "left registered: {entries:?}");
    }
}

#[test]
fn test_passing_suite_exits_zero() {
    let dir = tempdir().unwrap();
    write_features(&dir, &[("a", "exit 0"), ("b", "exit 0"), ("c", "exit 0")]);

    let output = run_cucumber(&dir, 2);
    assert_eq!(
        output.status.code(),
        Some(0),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_cleaned_up(&dir);
}

#[test]
fn test_one_failing_job_exits_one() {
    let dir = tempdir().unwrap();
    write_features(&dir, &[("a", "exit 0"), ("b", "exit 1"), ("c", "exit 0")]);

    let output = run_cucumber(&dir, 3);
    assert_eq!(output.status.code(), Some(1));
    assert_cleaned_up(&dir);
}

#[test]
fn test_idle_workers_do_not_stall_short_runs() {
    let dir = tempdir().unwrap();
    write_features(&dir, &[("a", "exit 0"), ("b", "exit 0"), ("c", "exit 0")]);

    for _ in 0..5 {
        let started = Instant::now();
        let output = run_cucumber(&dir, 3);
        assert_eq!(output.status.code(), Some(0));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
    assert_cleaned_up(&dir);
}

#[test]
fn test_no_feature_files() {
    let dir = tempdir().unwrap();
    write_features(&dir, &[]);

    let output = run_cucumber(&dir, 2);
    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Please create some feature files in the features directory."));
}

#[test]
fn test_invalid_configuration_is_reported_once() {
    let dir = tempdir().unwrap();
    write_features(&dir, &[("a", "exit 0")]);

    let output = run_cucumber(&dir, 0);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(stderr.matches("Invalid configuration").count(), 1, "stderr: {stderr}");
}

#[test]
fn test_fan_runs_on_every_worker() {
    let dir = tempdir().unwrap();
    let output = flotilla(&dir)
        .args(["fan", "-w", "3", "touch", "ran$TEST_ENV_NUMBER"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(0));
    for ordinal in 0..3 {
        assert!(dir.path().join(format!("ran{ordinal}")).exists());
    }
}
