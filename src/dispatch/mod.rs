//! Job dispatch and outcome collection
//!
//! The dispatcher hands out each job exactly once; the [`Sink`] wraps it
//! with the outcome ledger and serves both endpoints for a run.

mod dispatcher;
mod sink;

pub use sink::{Sink, EXIT_FAILURE, EXIT_SUCCESS};

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use crate::models::{JobId, Outcome};
    use crate::output::Formatter;

    /// Formatter that remembers which jobs it saw
    #[derive(Clone, Default)]
    pub struct Recorder {
        pub seen: Arc<Mutex<Vec<JobId>>>,
        pub finalized: Arc<Mutex<bool>>,
    }

    impl Formatter for Recorder {
        fn job_finished(&mut self, outcome: &Outcome) {
            self.seen.lock().unwrap().push(outcome.id());
        }

        fn finalize(&mut self) {
            *self.finalized.lock().unwrap() = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::sink::Verdict;
    use super::testing::Recorder;
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use futures::future::join_all;
    use std::collections::BTreeSet;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    use crate::config::Endpoints;
    use crate::executor::{worker, Execution, Runner, WorkerEnv};
    use crate::models::{number_jobs, Job, JobId, WorkerId};
    use crate::transport::{Context, TransportConfig};

    /// Passes every job except those whose args start with "fail"
    struct ScriptedRunner;

    #[async_trait]
    impl Runner for ScriptedRunner {
        fn name(&self) -> &str {
            "scripted"
        }

        fn extract_jobs(&self, args: &[String]) -> Result<Vec<Job>> {
            Ok(number_jobs(args.iter().map(|arg| vec![arg.clone()])))
        }

        async fn execute(&self, job: &Job, env: &WorkerEnv) -> Execution {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Execution {
                passed: !job.args.iter().any(|arg| arg.starts_with("fail")),
                exit_code: Some(0),
                output: format!("{} ran {}", env.worker, job.describe()),
                duration_ms: 20,
            }
        }
    }

    fn endpoints(dir: &TempDir) -> Endpoints {
        Endpoints::new(
            format!("ipc://{}/dispatch", dir.path().display()),
            format!("ipc://{}/sink", dir.path().display()),
        )
    }

    struct Run {
        verdict: Verdict,
        seen: Vec<JobId>,
        processed: Vec<usize>,
        finalized: bool,
    }

    async fn run_scenario(args: &[&str], workers: u32) -> Run {
        let dir = tempdir().unwrap();
        let endpoints = endpoints(&dir);
        let runner = ScriptedRunner;

        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let jobs = runner.extract_jobs(&args).unwrap();
        let recorder = Recorder::default();
        let sink = Sink::new(jobs, recorder.clone());

        let mut sink_ctx = Context::new(TransportConfig::default());
        let pool = (0..workers).map(|ordinal| {
            let endpoints = endpoints.clone();
            let runner = &runner;
            async move {
                let mut ctx = Context::new(TransportConfig::default());
                let processed = worker::run(&mut ctx, runner, WorkerId(ordinal), &endpoints).await;
                assert_eq!(ctx.socket_count(), 0);
                processed
            }
        });

        let (verdict, processed) = tokio::join!(sink.serve(&mut sink_ctx, &endpoints), join_all(pool));
        sink_ctx.close().unwrap();

        let seen = recorder.seen.lock().unwrap().clone();
        let finalized = *recorder.finalized.lock().unwrap();
        Run {
            verdict: verdict.unwrap(),
            seen,
            processed: processed.into_iter().map(|p| p.unwrap()).collect(),
            finalized,
        }
    }

    fn assert_each_job_once(run: &Run, count: u64) {
        let unique: BTreeSet<JobId> = run.seen.iter().copied().collect();
        assert_eq!(run.seen.len() as u64, count);
        assert_eq!(unique, (0..count).map(JobId).collect());
        assert_eq!(run.processed.iter().sum::<usize>() as u64, count);
    }

    #[tokio::test]
    async fn test_all_jobs_pass() {
        let run = run_scenario(&["a", "b", "c"], 2).await;

        assert_each_job_once(&run, 3);
        assert!(run.verdict.passed());
        assert_eq!(run.verdict.exit_code(), EXIT_SUCCESS);
        assert!(run.finalized);
        assert!(run.verdict.jobs.iter().all(|job| job.worker.is_some()));
    }

    #[tokio::test]
    async fn test_one_failure_fails_the_run() {
        let run = run_scenario(&["a", "fail-b", "c"], 2).await;

        assert_each_job_once(&run, 3);
        assert!(!run.verdict.passed());
        assert_eq!(run.verdict.exit_code(), EXIT_FAILURE);
        let failed: Vec<JobId> = run.verdict.failed_jobs().map(|job| job.id).collect();
        assert_eq!(failed, vec![JobId(1)]);
    }

    #[tokio::test]
    async fn test_more_workers_than_jobs() {
        let run = run_scenario(&["only"], 4).await;
        assert_each_job_once(&run, 1);
        assert_eq!(run.processed.len(), 4);
    }

    #[tokio::test]
    async fn test_many_jobs_few_workers() {
        let names: Vec<String> = (0..25).map(|i| format!("job-{i}")).collect();
        let args: Vec<&str> = names.iter().map(String::as_str).collect();
        let run = run_scenario(&args, 3).await;
        assert_each_job_once(&run, 25);
        assert!(run.verdict.passed());
    }

    #[tokio::test]
    async fn test_empty_run_binds_and_finishes() {
        let dir = tempdir().unwrap();
        let endpoints = endpoints(&dir);
        let mut ctx = Context::new(TransportConfig::default());

        let verdict = Sink::new(Vec::new(), Recorder::default())
            .serve(&mut ctx, &endpoints)
            .await
            .unwrap();
        assert!(verdict.passed());
        assert!(!dir.path().join("dispatch").exists());
    }
}
