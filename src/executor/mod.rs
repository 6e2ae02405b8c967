//! Job execution
//!
//! The [`Runner`] capability and the worker loop that drives it.

mod runner;
pub mod worker;

pub use runner::{CommandRunner, Execution, Runner, WorkerEnv, ENV_ORDINAL};
