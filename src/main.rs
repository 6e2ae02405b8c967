//! flotilla - parallel test suite runner
//!
//! Splits a Cucumber or RSpec suite into jobs, one per test file, and runs
//! them on a pool of worker processes. A sink in the supervising process
//! hands out each job exactly once, collects every outcome and exits with
//! the combined verdict.
//!
//! ## Usage
//!
//! ```bash
//! # Run the features directory on 4 workers
//! flotilla cucumber -w 4
//!
//! # Run some specs with JSON output and extra rspec arguments
//! flotilla rspec -f json spec/models --tag ~slow
//!
//! # Prepare one database per worker
//! flotilla fan -w 4 'createdb app_test$TEST_ENV_NUMBER'
//!
//! # Abort a stuck run
//! flotilla clear
//! ```

use anyhow::{Context as _, Result};
use clap::Parser;
use std::time::Duration;
use tracing::info;

mod cli;
mod config;
mod dispatch;
mod executor;
mod models;
mod output;
mod suites;
mod supervisor;
mod transport;
mod utils;

use cli::{Args, Command, FanArgs, RunArgs, WorkerArgs};
use config::{EnvConfig, Endpoints, RunConfig};
use dispatch::{EXIT_FAILURE, EXIT_SUCCESS};
use executor::worker;
use models::WorkerId;
use output::FormatterSet;
use suites::{Suite, SuiteRunner};
use supervisor::{fan, process, PidFile, WorkerLaunch};
use transport::TransportConfig;
use utils::{init_logger, LogLevel};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();
    let verbose = args.log || EnvConfig::load().verbose();
    init_logger(LogLevel::from_verbose(verbose));

    let code = match run(args.command, verbose).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            EXIT_FAILURE
        }
    };
    std::process::exit(code);
}

async fn run(command: Command, verbose: bool) -> Result<i32> {
    match command {
        Command::Cucumber(run_args) => run_suite(Suite::Cucumber, run_args, verbose).await,
        Command::Rspec(run_args) => run_suite(Suite::Rspec, run_args, verbose).await,
        Command::Fan(fan_args) => run_fan(fan_args).await,
        Command::Clear => clear(),
        Command::Worker(worker_args) => run_worker(worker_args, verbose).await,
    }
}

async fn run_suite(suite: Suite, run_args: RunArgs, verbose: bool) -> Result<i32> {
    let config = RunConfig::load(&run_args.overrides(verbose)).context("Invalid configuration")?;
    let runner = SuiteRunner::new(suite, config.command.as_deref());
    info!(%suite, program = runner.program(), workers = config.workers, "Running suite");
    let launch = WorkerLaunch::current_exe(cli::worker_args(suite, &config))?;
    let formatter = FormatterSet::stdout(&config.formats);
    let mut registry = PidFile::default_location();

    supervisor::run_suite(
        &runner,
        &run_args.args,
        &config,
        &launch,
        formatter,
        &mut registry,
    )
    .await
}

async fn run_fan(fan_args: FanArgs) -> Result<i32> {
    let workers = fan_args
        .workers
        .or(EnvConfig::load().workers)
        .unwrap_or_else(num_cpus::get);
    let statuses = fan::fan_out(&fan_args.command, workers).await?;
    Ok(fan::exit_code(&statuses))
}

fn clear() -> Result<i32> {
    let mut registry = PidFile::default_location();
    let signalled = supervisor::clear(&mut registry, process::current_pid())
        .with_context(|| format!("Failed to clear {}", registry.path().display()))?;
    info!(signalled, "Cleared");
    Ok(EXIT_SUCCESS)
}

async fn run_worker(worker_args: WorkerArgs, verbose: bool) -> Result<i32> {
    let suite = Suite::from_name(&worker_args.suite)
        .with_context(|| format!("Unknown suite '{}'", worker_args.suite))?;
    let runner = SuiteRunner::new(suite, worker_args.command.as_deref());
    let endpoints = Endpoints::new(worker_args.dispatch_endpoint, worker_args.sink_endpoint);
    let transport = TransportConfig {
        verbose,
        connect_timeout: Duration::from_millis(worker_args.connect_timeout_ms),
    };

    worker::run_process(&runner, WorkerId(worker_args.ordinal), &endpoints, transport).await?;
    Ok(EXIT_SUCCESS)
}
