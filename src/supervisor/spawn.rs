//! Worker process spawning and reaping

use anyhow::{Context as _, Result};
use futures::future::join_all;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::executor::ENV_ORDINAL;
use crate::models::WorkerId;

/// Flag appended to every worker command line, followed by the ordinal
pub const ORDINAL_FLAG: &str = "--ordinal";

/// Command line used to start one worker
#[derive(Clone, Debug)]
pub struct WorkerLaunch {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl WorkerLaunch {
    pub fn new(program: impl Into<PathBuf>, args: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Re-run the current executable with `args`
    pub fn current_exe(args: impl IntoIterator<Item = impl Into<OsString>>) -> Result<Self> {
        let program = std::env::current_exe().context("Failed to locate the flotilla executable")?;
        Ok(Self::new(program, args))
    }

    fn command(&self, worker: WorkerId) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(ORDINAL_FLAG)
            .arg(worker.0.to_string())
            .env(ENV_ORDINAL, worker.0.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

/// How a worker ended
#[derive(Debug)]
pub struct Reaped {
    pub worker: WorkerId,
    pub status: Option<ExitStatus>,
    pub killed: bool,
}

/// Running worker processes
#[derive(Debug)]
pub struct WorkerPool {
    children: Vec<(WorkerId, Child)>,
}

impl WorkerPool {
    /// Start `count` workers with ordinals `0..count`
    pub fn spawn(launch: &WorkerLaunch, count: usize) -> Result<Self> {
        let mut children = Vec::with_capacity(count);
        for ordinal in 0..count {
            let worker = WorkerId(u32::try_from(ordinal).context("Too many workers")?);
            let child = launch
                .command(worker)
                .spawn()
                .with_context(|| format!("Failed to spawn {worker}"))?;
            debug!(%worker, pid = ?child.id(), "Spawned worker");
            children.push((worker, child));
        }
        info!(count, program = %launch.program.display(), "Workers started");
        Ok(Self { children })
    }

    pub fn pids(&self) -> Vec<u32> {
        self.children.iter().filter_map(|(_, child)| child.id()).collect()
    }

    /// Wait for every worker; any still running after `grace` is killed
    pub async fn reap(self, grace: Duration) -> Vec<Reaped> {
        let waits = self.children.into_iter().map(|(worker, mut child)| async move {
            match timeout(grace, child.wait()).await {
                Ok(Ok(status)) => {
                    if !status.success() {
                        warn!(%worker, %status, "Worker exited abnormally");
                    }
                    Reaped {
                        worker,
                        status: Some(status),
                        killed: false,
                    }
                }
                Ok(Err(e)) => {
                    error!(%worker, error = %e, "Failed to wait for worker");
                    Reaped {
                        worker,
                        status: None,
                        killed: false,
                    }
                }
                Err(_) => {
                    debug!(%worker, ?grace, "Worker still running, killing it");
                    if let Err(e) = child.kill().await {
                        error!(%worker, error = %e, "Failed to kill worker");
                    }
                    Reaped {
                        worker,
                        status: child.try_wait().ok().flatten(),
                        killed: true,
                    }
                }
            }
        });
        join_all(waits).await
    }
}
