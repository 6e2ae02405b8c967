//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{CliOverrides, RunConfig};
use crate::suites::Suite;

/// Parallel test suite runner
#[derive(Parser, Debug)]
#[command(name = "flotilla")]
#[command(version)]
#[command(about = "Run a test suite across parallel worker processes")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Print debug messages to stderr
    #[arg(short, long, global = true)]
    pub log: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Parallelize cucumber with custom arguments
    Cucumber(RunArgs),

    /// Parallelize rspec with custom arguments
    Rspec(RunArgs),

    /// Execute the given command once on every worker
    Fan(FanArgs),

    /// Abort all registered flotilla processes
    Clear,

    /// Worker process entry point
    #[command(hide = true)]
    Worker(WorkerArgs),
}

/// Arguments for the suite commands
#[derive(clap::Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Number of concurrent worker processes [default: CPU count]
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Output formats (console, json, csv, summary); repeatable or comma separated
    #[arg(short = 'f', long = "format", value_delimiter = ',')]
    pub formats: Vec<String>,

    /// Endpoint workers request jobs from [default: ipc://dispatch]
    #[arg(long)]
    pub dispatch_endpoint: Option<String>,

    /// Endpoint workers report outcomes to [default: ipc://sink]
    #[arg(long)]
    pub sink_endpoint: Option<String>,

    /// Executable to run instead of the framework default
    #[arg(long)]
    pub command: Option<String>,

    /// Configuration file (YAML or JSON)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Paths and framework arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

impl RunArgs {
    pub fn overrides(&self, log: bool) -> CliOverrides {
        CliOverrides {
            workers: self.workers,
            formats: self.formats.clone(),
            dispatch_endpoint: self.dispatch_endpoint.clone(),
            sink_endpoint: self.sink_endpoint.clone(),
            command: self.command.clone(),
            config: self.config.clone(),
            verbose: log,
        }
    }
}

/// Arguments for the fan command
#[derive(clap::Args, Debug, Clone)]
pub struct FanArgs {
    /// Number of concurrent processes [default: CPU count]
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Command to run; words are joined with spaces and run by `sh -c`
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

/// Arguments for the hidden worker command
#[derive(clap::Args, Debug, Clone)]
pub struct WorkerArgs {
    #[arg(long, value_parser = ["cucumber", "rspec"])]
    pub suite: String,

    #[arg(long)]
    pub dispatch_endpoint: String,

    #[arg(long)]
    pub sink_endpoint: String,

    #[arg(long)]
    pub command: Option<String>,

    #[arg(long)]
    pub connect_timeout_ms: u64,

    #[arg(long)]
    pub ordinal: u32,
}

/// Command line for a worker of `suite`, minus the ordinal the pool appends
pub fn worker_args(suite: Suite, config: &RunConfig) -> Vec<String> {
    let mut args = vec![
        "worker".to_string(),
        "--suite".to_string(),
        suite.name().to_string(),
        "--dispatch-endpoint".to_string(),
        config.endpoints.dispatch.clone(),
        "--sink-endpoint".to_string(),
        config.endpoints.sink.clone(),
        "--connect-timeout-ms".to_string(),
        config.connect_timeout.as_millis().to_string(),
    ];
    if let Some(command) = &config.command {
        args.push("--command".to_string());
        args.push(command.clone());
    }
    if config.verbose {
        args.push("--log".to_string());
    }
    args
}
