//! Job model
//!
//! A job is one invocation of the test framework. The sink keeps the
//! authoritative copy; workers receive their own copy over the wire, update
//! it and send it back.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque job identifier, unique within a run
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Worker ordinal, 0-based and distinct per worker process
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub u32);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker {}", self.0)
    }
}

/// Unit of work
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub args: Vec<String>,
    pub worker: Option<WorkerId>,
    failed: bool,
}

impl Job {
    pub fn new(id: JobId, args: Vec<String>) -> Self {
        Self {
            id,
            args,
            worker: None,
            failed: false,
        }
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Record one execution result. A failure sticks: a later pass does not
    /// clear it.
    pub fn record(&mut self, passed: bool) {
        if !passed {
            self.failed = true;
        }
    }

    pub fn mark_failed(&mut self) {
        self.failed = true;
    }

    /// Arguments joined for display
    pub fn describe(&self) -> String {
        self.args.join(" ")
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job {} [{}]", self.id, self.describe())
    }
}

/// Build jobs from argument lists, numbering them in order
pub fn number_jobs<I>(arg_lists: I) -> Vec<Job>
where
    I: IntoIterator<Item = Vec<String>>,
{
    arg_lists
        .into_iter()
        .enumerate()
        .map(|(index, args)| Job::new(JobId(index as u64), args))
        .collect()
}
