//! Sink: dispatches jobs and collects their outcomes
//!
//! The sink binds two endpoints. Workers ask for jobs on the dispatch
//! endpoint (request/reply) and push finished jobs to the sink endpoint
//! (push/pull). Both are serviced from one loop until every dispatched job
//! has reported back.

use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::dispatcher::Dispatcher;
use crate::config::Endpoints;
use crate::models::{Control, Job, JobId, Message, Outcome, WorkerId};
use crate::output::Formatter;
use crate::transport::{Context, Socket, SocketOptions, SocketType, TransportError};

/// Exit code for a passing run
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for a failing run or a run that could not start
pub const EXIT_FAILURE: i32 = 1;

/// Where the sink is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkState {
    /// Jobs are still queued
    Dispatching,
    /// Queue is empty, outcomes are still outstanding
    Draining,
    /// Every dispatched job has reported
    Done,
}

/// Rejected outcome
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("outcome for unknown job {0}")]
    UnknownJob(JobId),

    #[error("outcome for job {0}, which was never dispatched")]
    NotDispatched(JobId),

    #[error("duplicate outcome for job {0}")]
    Duplicate(JobId),
}

/// Final result of a run, with every job as recorded by the sink
#[derive(Clone, Debug)]
pub struct Verdict {
    pub jobs: Vec<Job>,
}

impl Verdict {
    pub fn passed(&self) -> bool {
        self.jobs.iter().all(|job| !job.failed())
    }

    pub fn failed_jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter().filter(|job| job.failed())
    }

    pub fn exit_code(&self) -> i32 {
        if self.passed() {
            EXIT_SUCCESS
        } else {
            EXIT_FAILURE
        }
    }
}

/// Dispatcher plus outcome ledger. Job ids must be unique.
pub struct Sink<F: Formatter> {
    dispatcher: Dispatcher,
    ledger: BTreeMap<JobId, Job>,
    finished: BTreeSet<JobId>,
    formatter: F,
}

impl<F: Formatter> Sink<F> {
    pub fn new(jobs: Vec<Job>, formatter: F) -> Self {
        let ledger = jobs.iter().map(|job| (job.id, job.clone())).collect();
        Self {
            dispatcher: Dispatcher::new(jobs),
            ledger,
            finished: BTreeSet::new(),
            formatter,
        }
    }

    pub fn state(&self) -> SinkState {
        if !self.dispatcher.is_exhausted() {
            SinkState::Dispatching
        } else if self.finished.len() < self.dispatcher.dispatched() {
            SinkState::Draining
        } else {
            SinkState::Done
        }
    }

    pub fn dispatched(&self) -> usize {
        self.dispatcher.dispatched()
    }

    pub fn finished(&self) -> usize {
        self.finished.len()
    }

    /// Answer a job request: the next job, or the exhaustion signal
    pub fn handle_request(&mut self, worker: WorkerId) -> Message {
        match self.dispatcher.next_for(worker) {
            Some(job) => {
                if let Some(entry) = self.ledger.get_mut(&job.id) {
                    entry.worker = Some(worker);
                }
                debug!(job = %job.id, %worker, "Dispatching job");
                Message::Job(job)
            }
            None => {
                debug!(%worker, "No jobs left");
                Message::done()
            }
        }
    }

    /// Take back a job whose reply could not be delivered
    pub fn return_undelivered(&mut self, job: Job) {
        if let Some(entry) = self.ledger.get_mut(&job.id) {
            entry.worker = None;
        }
        self.dispatcher.restore(job);
    }

    /// Record a finished job and forward it to the formatter
    pub fn record(&mut self, outcome: Outcome) -> Result<(), SinkError> {
        let id = outcome.id();
        let entry = self.ledger.get_mut(&id).ok_or(SinkError::UnknownJob(id))?;
        if entry.worker.is_none() {
            return Err(SinkError::NotDispatched(id));
        }
        if !self.finished.insert(id) {
            return Err(SinkError::Duplicate(id));
        }

        if outcome.job.failed() {
            entry.mark_failed();
        }
        debug!(job = %id, failed = outcome.job.failed(), "Job finished");
        self.formatter.job_finished(&outcome);
        Ok(())
    }

    pub fn verdict(&self) -> Verdict {
        Verdict {
            jobs: self.ledger.values().cloned().collect(),
        }
    }

    async fn answer(&mut self, dispatch: &mut Socket, request: Message) -> Result<(), TransportError> {
        let reply = match request {
            Message::Control(Control::Ready { worker }) => self.handle_request(worker),
            other => {
                warn!(message = ?other, "Unexpected message on dispatch endpoint");
                Message::done()
            }
        };

        let undelivered = match &reply {
            Message::Job(job) => Some(job.clone()),
            _ => None,
        };

        match dispatch.send(reply).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_disconnect() => {
                warn!(error = %e, "Worker left before its reply was sent");
                if let Some(job) = undelivered {
                    self.return_undelivered(job);
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Bind both endpoints, run until every dispatched job has reported,
    /// then close the sockets and return the verdict
    pub async fn serve(
        mut self,
        ctx: &mut Context,
        endpoints: &Endpoints,
    ) -> Result<Verdict, TransportError> {
        let mut dispatch = ctx
            .socket(SocketType::Reply, SocketOptions::bind(&endpoints.dispatch))
            .await?;
        let mut results = ctx
            .socket(SocketType::Pull, SocketOptions::bind(&endpoints.sink))
            .await?;

        info!(
            jobs = self.ledger.len(),
            dispatch = %endpoints.dispatch,
            sink = %endpoints.sink,
            "Sink started"
        );

        while self.state() != SinkState::Done {
            // Outcomes first: the last one ends the loop without another reply
            tokio::select! {
                biased;
                message = results.recv::<Message>() => {
                    match message? {
                        Message::Outcome(outcome) => {
                            if let Err(e) = self.record(outcome) {
                                warn!(error = %e, "Ignoring outcome");
                            }
                        }
                        other => warn!(message = ?other, "Unexpected message on sink endpoint"),
                    }
                }
                request = dispatch.recv::<Message>() => {
                    let request = request?;
                    self.answer(&mut dispatch, request).await?;
                }
            }
        }

        // Requests that raced the last outcome still get an answer
        while let Some(request) = dispatch.recv_mode::<Message>(false).await? {
            self.answer(&mut dispatch, request).await?;
        }

        dispatch.close()?;
        results.close()?;
        self.formatter.finalize();

        let verdict = self.verdict();
        info!(
            jobs = verdict.jobs.len(),
            dispatched = self.dispatched(),
            finished = self.finished(),
            failed = verdict.failed_jobs().count(),
            passed = verdict.passed(),
            "Sink finished"
        );
        Ok(verdict)
    }
}
