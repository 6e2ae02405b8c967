//! Fan-out: run one shell command once per worker slot
//!
//! Used for per-worker setup such as creating one database per
//! `TEST_ENV_NUMBER`.

use anyhow::{bail, Context as _, Result};
use futures::future::join_all;
use std::process::ExitStatus;
use tokio::process::Command;
use tracing::{info, warn};

use crate::dispatch::{EXIT_FAILURE, EXIT_SUCCESS};
use crate::executor::ENV_ORDINAL;
use crate::models::WorkerId;

/// Run `command` through `sh -c` on `workers` concurrent processes and wait
/// for all of them. Returns each worker's exit status in ordinal order.
pub async fn fan_out(command: &[String], workers: usize) -> Result<Vec<(WorkerId, ExitStatus)>> {
    if command.is_empty() {
        bail!("No command given to fan out");
    }
    if workers == 0 {
        bail!("Worker count must be at least 1");
    }

    let line = command.join(" ");
    println!("Running '{line}' on {workers} workers");

    let mut children = Vec::with_capacity(workers);
    for ordinal in 0..workers {
        let worker = WorkerId(u32::try_from(ordinal).context("Too many workers")?);
        let child = Command::new("sh")
            .arg("-c")
            .arg(&line)
            .env(ENV_ORDINAL, worker.0.to_string())
            .spawn()
            .with_context(|| format!("Failed to start '{line}' for {worker}"))?;
        children.push((worker, child));
    }

    let waits = children.into_iter().map(|(worker, mut child)| async move {
        let status = child.wait().await;
        (worker, status)
    });

    let mut statuses = Vec::with_capacity(workers);
    for (worker, status) in join_all(waits).await {
        let status = status.with_context(|| format!("Failed to wait for {worker}"))?;
        if !status.success() {
            warn!(%worker, %status, command = %line, "Fanned-out command failed");
        }
        statuses.push((worker, status));
    }
    info!(workers, command = %line, "Fan-out finished");
    Ok(statuses)
}

/// 0 when every invocation succeeded
pub fn exit_code(statuses: &[(WorkerId, ExitStatus)]) -> i32 {
    if statuses.iter().all(|(_, status)| status.success()) {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_fan_out_runs_once_per_ordinal() {
        let dir = tempdir().unwrap();
        let command = vec![format!(
            "sleep 0.2; echo $$ > {}/worker-$TEST_ENV_NUMBER",
            dir.path().display()
        )];

        let statuses = fan_out(&command, 4).await.unwrap();
        assert_eq!(statuses.len(), 4);
        assert_eq!(exit_code(&statuses), EXIT_SUCCESS);

        let names: BTreeSet<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        let expected: BTreeSet<String> = (0..4).map(|i| format!("worker-{i}")).collect();
        assert_eq!(names, expected);

        // Four distinct processes wrote the files
        let pids: BTreeSet<String> = names
            .iter()
            .map(|name| std::fs::read_to_string(dir.path().join(name)).unwrap())
            .collect();
        assert_eq!(pids.len(), 4);
    }

    #[tokio::test]
    async fn test_fan_out_runs_concurrently() {
        let start = std::time::Instant::now();
        let statuses = fan_out(&["sleep".into(), "0.5".into()], 4).await.unwrap();
        assert_eq!(statuses.len(), 4);
        assert!(start.elapsed() < std::time::Duration::from_millis(1900));
    }

    #[tokio::test]
    async fn test_failure_sets_exit_code() {
        let statuses = fan_out(&[r#"test "$TEST_ENV_NUMBER" != 1"#.into()], 3)
            .await
            .unwrap();
        assert_eq!(exit_code(&statuses), EXIT_FAILURE);
        assert!(!statuses[1].1.success());
    }

    #[tokio::test]
    async fn test_rejects_empty_command() {
        assert!(fan_out(&[], 2).await.is_err());
    }
}
