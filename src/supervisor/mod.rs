//! Process supervisor
//!
//! Drives a suite run from the parent process: extracts jobs, spawns the
//! workers, serves the sink, reaps the workers and turns the verdict into
//! an exit code.

pub mod fan;
pub mod process;
pub mod registry;
pub mod spawn;

pub use registry::{clear, PidFile, ProcessRegistry};
pub use spawn::{WorkerLaunch, WorkerPool};

use anyhow::{Context as _, Result};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::RunConfig;
use crate::dispatch::{Sink, EXIT_FAILURE};
use crate::executor::Runner;
use crate::output::Formatter;
use crate::transport::Context;

/// Name the supervising process shows while the sink runs
pub const SINK_PROCESS_NAME: &str = "flotilla sink";

/// Time left to workers once every outcome is in. A worker still running
/// then has no job and is either exiting or has not connected yet.
pub const SETTLE_GRACE: Duration = Duration::from_millis(500);

/// Run a suite end to end and return the process exit code.
///
/// Finding no jobs prints the runner's hint and returns 1 before any worker
/// is spawned or any socket is opened.
pub async fn run_suite<R, F>(
    runner: &R,
    args: &[String],
    config: &RunConfig,
    launch: &WorkerLaunch,
    formatter: F,
    registry: &mut dyn ProcessRegistry,
) -> Result<i32>
where
    R: Runner + ?Sized,
    F: Formatter,
{
    config.validate()?;

    let jobs = runner.extract_jobs(args)?;
    if jobs.is_empty() {
        println!("{}", runner.empty_message());
        return Ok(EXIT_FAILURE);
    }

    let workers = config.workers.min(jobs.len());
    info!(
        runner = runner.name(),
        jobs = jobs.len(),
        workers,
        "Starting run"
    );

    process::set_name(SINK_PROCESS_NAME);
    process::detach();

    let pool = WorkerPool::spawn(launch, workers)?;
    let mut pids = vec![process::current_pid()];
    pids.extend(pool.pids());
    for pid in &pids {
        if let Err(e) = registry.register(*pid) {
            warn!(pid, error = %e, "Failed to register process");
        }
    }

    let mut ctx = Context::new(config.transport());
    let served = Sink::new(jobs, formatter)
        .serve(&mut ctx, &config.endpoints)
        .await;
    if let Err(e) = ctx.close() {
        warn!(error = %e, "Failed to close transport");
    }

    let grace = if served.is_ok() {
        config.reap_grace.min(SETTLE_GRACE)
    } else {
        config.reap_grace
    };
    let reaped = pool.reap(grace).await;
    for worker in reaped.iter().filter(|r| r.killed) {
        debug!(worker = %worker.worker, status = ?worker.status, "Worker was killed");
    }
    let killed = reaped.iter().filter(|r| r.killed).count();
    if killed > 0 {
        if served.is_ok() {
            debug!(killed, "Stopped idle workers");
        } else {
            warn!(killed, "Workers had to be killed");
        }
    }

    for pid in &pids {
        if let Err(e) = registry.unregister(*pid) {
            warn!(pid, error = %e, "Failed to unregister process");
        }
    }

    let verdict = served.context("Sink failed")?;
    Ok(verdict.exit_code())
}
