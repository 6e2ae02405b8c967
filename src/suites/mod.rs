//! Test framework suites
//!
//! A suite knows which files make up its jobs and which executable runs
//! them. Command-line arguments naming existing paths select job files;
//! everything else is handed to every job invocation unchanged.

mod discover;

pub use discover::find_files;

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::executor::{CommandRunner, Execution, Runner, WorkerEnv};
use crate::models::{number_jobs, Job};

/// Supported frameworks
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Suite {
    Cucumber,
    Rspec,
}

impl Suite {
    pub fn name(&self) -> &'static str {
        match self {
            Suite::Cucumber => "cucumber",
            Suite::Rspec => "rspec",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "cucumber" => Some(Suite::Cucumber),
            "rspec" => Some(Suite::Rspec),
            _ => None,
        }
    }

    /// Executable run for each job unless overridden
    pub fn program(&self) -> &'static str {
        match self {
            Suite::Cucumber => "cucumber",
            Suite::Rspec => "rspec",
        }
    }

    /// Directory searched when no paths are given
    pub fn default_dir(&self) -> &'static str {
        match self {
            Suite::Cucumber => "features",
            Suite::Rspec => "spec",
        }
    }

    pub fn is_job_file(&self, path: &Path) -> bool {
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => return false,
        };
        match self {
            Suite::Cucumber => name.ends_with(".feature"),
            Suite::Rspec => name.ends_with("_spec.rb"),
        }
    }

    /// Shown when discovery finds nothing to run
    pub fn empty_message(&self) -> String {
        let kind = match self {
            Suite::Cucumber => "feature",
            Suite::Rspec => "spec",
        };
        format!(
            "Please create some {kind} files in the {} directory.",
            self.default_dir()
        )
    }
}

impl fmt::Display for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Arguments split into job paths and pass-through options
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SuiteArgs {
    pub paths: Vec<PathBuf>,
    pub passthrough: Vec<String>,
}

impl SuiteArgs {
    pub fn split(args: &[String]) -> Self {
        let mut split = Self::default();
        for arg in args {
            let path = Path::new(arg);
            if !arg.starts_with('-') && path.exists() {
                split.paths.push(path.to_path_buf());
            } else {
                split.passthrough.push(arg.clone());
            }
        }
        split
    }
}

/// [`Runner`] for a framework suite
#[derive(Clone, Debug)]
pub struct SuiteRunner {
    suite: Suite,
    command: CommandRunner,
}

impl SuiteRunner {
    /// `command` replaces the framework executable when given
    pub fn new(suite: Suite, command: Option<&str>) -> Self {
        Self {
            suite,
            command: CommandRunner::new(command.unwrap_or(suite.program())),
        }
    }

    pub fn program(&self) -> &str {
        self.command.program()
    }

    /// Job files for `args`, falling back to the default directory
    pub fn discover(&self, args: &SuiteArgs) -> Vec<PathBuf> {
        let roots = if args.paths.is_empty() {
            vec![PathBuf::from(self.suite.default_dir())]
        } else {
            args.paths.clone()
        };

        let mut files: Vec<PathBuf> = Vec::new();
        for root in &roots {
            for file in find_files(root, |p| self.suite.is_job_file(p)) {
                if !files.contains(&file) {
                    files.push(file);
                }
            }
        }
        files
    }
}

#[async_trait]
impl Runner for SuiteRunner {
    fn name(&self) -> &str {
        self.suite.name()
    }

    fn extract_jobs(&self, args: &[String]) -> Result<Vec<Job>> {
        let args = SuiteArgs::split(args);
        let files = self.discover(&args);
        debug!(suite = %self.suite, files = files.len(), passthrough = ?args.passthrough, "Extracted jobs");

        Ok(number_jobs(files.into_iter().map(|file| {
            let mut job_args = args.passthrough.clone();
            job_args.push(file.display().to_string());
            job_args
        })))
    }

    async fn execute(&self, job: &Job, env: &WorkerEnv) -> Execution {
        self.command.run(job, env).await
    }

    fn empty_message(&self) -> String {
        self.suite.empty_message()
    }
}
