//! Data models shared by dispatcher, workers and sink
//!
//! This module contains the job record, the wire envelope and run totals.

mod job;
mod message;
mod summary;

pub use job::{number_jobs, Job, JobId, WorkerId};
pub use message::{Control, Message, Outcome};
pub use summary::RunSummary;
