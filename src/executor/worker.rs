//! Worker loop
//!
//! A worker asks the dispatcher for a job, runs it, pushes the outcome to
//! the sink, and asks again. The dispatcher's exhaustion signal ends the
//! loop. So does the dispatcher going away, since the sink closes its
//! endpoints as soon as every outcome is in.

use anyhow::{Context as _, Result};
use tracing::{debug, info, info_span, warn, Instrument};

use super::runner::{Runner, WorkerEnv};
use crate::config::Endpoints;
use crate::models::{Control, Job, Message, Outcome, WorkerId};
use crate::supervisor::process;
use crate::transport::{Context, Socket, SocketOptions, SocketType, TransportConfig, TransportError};

/// Run jobs until the dispatcher is exhausted. Returns the number of jobs
/// this worker processed. Closes `ctx` on the way out.
pub async fn run<R>(
    ctx: &mut Context,
    runner: &R,
    worker: WorkerId,
    endpoints: &Endpoints,
) -> Result<usize, TransportError>
where
    R: Runner + ?Sized,
{
    let mut dispatch = ctx
        .socket(SocketType::Request, SocketOptions::connect(&endpoints.dispatch))
        .await?;
    let mut results = ctx
        .socket(SocketType::Push, SocketOptions::connect(&endpoints.sink))
        .await?;

    let env = WorkerEnv::new(worker);
    let mut processed = 0;

    while let Some(mut job) = next_job(&mut dispatch, worker).await? {
        let execution = runner.execute(&job, &env).await;
        job.record(execution.passed);

        let outcome = Outcome {
            job,
            output: execution.output,
            exit_code: execution.exit_code,
            duration_ms: execution.duration_ms,
        };
        results.send(Message::Outcome(outcome)).await?;
        processed += 1;
    }

    debug!(processed, "Worker exhausted");
    ctx.close()?;
    Ok(processed)
}

/// Ask for the next job; `None` once there is nothing left to run
async fn next_job(dispatch: &mut Socket, worker: WorkerId) -> Result<Option<Job>, TransportError> {
    match dispatch.send(Message::ready(worker)).await {
        Ok(_) => {}
        Err(e) if e.is_disconnect() => {
            debug!(error = %e, "Dispatcher gone before request");
            return Ok(None);
        }
        Err(e) => return Err(e),
    }

    match dispatch.recv::<Message>().await {
        Ok(Message::Job(job)) => Ok(Some(job)),
        Ok(Message::Control(Control::Done)) => Ok(None),
        Ok(other) => {
            warn!(message = ?other, "Unexpected reply from dispatcher");
            Ok(None)
        }
        Err(e) if e.is_disconnect() => {
            debug!(error = %e, "Dispatcher gone while waiting for a job");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Entry point of a worker process: names the process, builds its own
/// transport context and runs the loop inside a span carrying the ordinal
pub async fn run_process<R>(
    runner: &R,
    worker: WorkerId,
    endpoints: &Endpoints,
    transport: TransportConfig,
) -> Result<usize>
where
    R: Runner + ?Sized,
{
    process::set_name(&format!("flotilla w{}", worker.0));

    let span = info_span!("worker", ordinal = worker.0, runner = runner.name());
    async move {
        let mut ctx = Context::new(transport);
        let processed = run(&mut ctx, runner, worker, endpoints)
            .await
            .with_context(|| format!("{worker} failed"))?;
        info!(processed, "Worker finished");
        Ok(processed)
    }
    .instrument(span)
    .await
}
