//! Job execution capability
//!
//! A [`Runner`] knows how to find jobs for a suite and how to run one of
//! them. [`CommandRunner`] runs a framework executable as a child process.

use anyhow::Result;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::models::{Job, WorkerId};
use crate::utils::Timer;

/// Environment variable carrying the worker ordinal
pub const ENV_ORDINAL: &str = "TEST_ENV_NUMBER";

/// Per-worker environment handed to every execution
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkerEnv {
    pub worker: WorkerId,
}

impl WorkerEnv {
    pub fn new(worker: WorkerId) -> Self {
        Self { worker }
    }

    /// Variables exported to executed commands
    pub fn vars(&self) -> Vec<(&'static str, String)> {
        vec![(ENV_ORDINAL, self.worker.0.to_string())]
    }
}

/// Result of running one job
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Execution {
    pub passed: bool,
    pub exit_code: Option<i32>,
    pub output: String,
    pub duration_ms: u64,
}

/// Pluggable job source and executor
#[async_trait]
pub trait Runner: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Turn command-line arguments into the job list for a run
    fn extract_jobs(&self, args: &[String]) -> Result<Vec<Job>>;

    /// Run one job
    async fn execute(&self, job: &Job, env: &WorkerEnv) -> Execution;

    /// Shown when `extract_jobs` finds nothing
    fn empty_message(&self) -> String {
        format!("No {} jobs found.", self.name())
    }
}

/// Runs `program <job args>` and passes when it exits 0
#[derive(Clone, Debug)]
pub struct CommandRunner {
    program: String,
}

impl CommandRunner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Run the program for `job`. A launch failure counts as a failed
    /// execution with the error as output.
    pub async fn run(&self, job: &Job, env: &WorkerEnv) -> Execution {
        let timer = Timer::start(format!("{} {}", self.program, job.describe()));
        info!(job = %job.id, program = %self.program, args = ?job.args, "Executing job");

        let result = Command::new(&self.program)
            .args(&job.args)
            .envs(env.vars())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        let duration_ms = timer.elapsed_ms();
        match result {
            Ok(output) => {
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.is_empty() {
                    if !text.is_empty() && !text.ends_with('\n') {
                        text.push('\n');
                    }
                    text.push_str(&stderr);
                }

                let exit_code = output.status.code();
                debug!(job = %job.id, exit_code = ?exit_code, duration_ms, "Job completed");
                timer.stop();

                Execution {
                    passed: output.status.success(),
                    exit_code,
                    output: text,
                    duration_ms,
                }
            }
            Err(e) => {
                error!(job = %job.id, program = %self.program, error = %e, "Failed to launch job");
                Execution {
                    passed: false,
                    exit_code: None,
                    output: format!("failed to launch {}: {e}", self.program),
                    duration_ms,
                }
            }
        }
    }
}
