//! Wire envelope exchanged between workers, dispatcher and sink

use serde::{Deserialize, Serialize};
use std::fmt;

use super::job::{Job, JobId, WorkerId};

/// Tagged message envelope
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Message {
    Job(Job),
    Outcome(Outcome),
    Control(Control),
}

/// Control signals
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum Control {
    /// Worker asks for its next job
    Ready { worker: WorkerId },
    /// No more jobs
    Done,
}

impl Message {
    pub fn ready(worker: WorkerId) -> Self {
        Message::Control(Control::Ready { worker })
    }

    pub fn done() -> Self {
        Message::Control(Control::Done)
    }
}

/// Finished job as reported by a worker
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub job: Job,
    pub output: String,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
}

impl Outcome {
    pub fn id(&self) -> JobId {
        self.job.id
    }

    pub fn passed(&self) -> bool {
        !self.job.failed()
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.passed() { "PASS" } else { "FAIL" };
        write!(f, "{status} {} [{}ms]", self.job, self.duration_ms)
    }
}
