//! Configuration module
//!
//! Resolves the settings for one run. Precedence, highest first: command
//! line, `FLOTILLA_*` environment, config file, defaults.

pub mod env;
pub mod file;

pub use env::EnvConfig;
pub use file::FileConfig;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::output::OutputFormat;
use crate::transport::{Endpoint, TransportConfig};

pub const DEFAULT_DISPATCH_ENDPOINT: &str = "ipc://dispatch";
pub const DEFAULT_SINK_ENDPOINT: &str = "ipc://sink";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_REAP_GRACE_SECS: u64 = 5;

/// The two well-known endpoints of a run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    pub dispatch: String,
    pub sink: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            dispatch: DEFAULT_DISPATCH_ENDPOINT.to_string(),
            sink: DEFAULT_SINK_ENDPOINT.to_string(),
        }
    }
}

impl Endpoints {
    pub fn new(dispatch: impl Into<String>, sink: impl Into<String>) -> Self {
        Self {
            dispatch: dispatch.into(),
            sink: sink.into(),
        }
    }
}

/// Settings given on the command line; `None`/empty means "not given"
#[derive(Clone, Debug, Default)]
pub struct CliOverrides {
    pub workers: Option<usize>,
    pub formats: Vec<String>,
    pub dispatch_endpoint: Option<String>,
    pub sink_endpoint: Option<String>,
    pub command: Option<String>,
    pub config: Option<PathBuf>,
    pub verbose: bool,
}

/// Fully resolved settings for a run
#[derive(Clone, Debug)]
pub struct RunConfig {
    /// Worker processes to spawn. Defaults to the detected CPU count.
    pub workers: usize,

    /// Active output formats. Defaults to console.
    pub formats: Vec<OutputFormat>,

    pub endpoints: Endpoints,

    /// Executable replacing the framework default
    pub command: Option<String>,

    /// Debug logging and transport traces
    pub verbose: bool,

    /// How long workers wait for the sink endpoints. Defaults to 10 s.
    pub connect_timeout: Duration,

    /// Grace period before still-running workers are killed. Defaults to 5 s.
    pub reap_grace: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            formats: vec![OutputFormat::Console],
            endpoints: Endpoints::default(),
            command: None,
            verbose: false,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            reap_grace: Duration::from_secs(DEFAULT_REAP_GRACE_SECS),
        }
    }
}

impl RunConfig {
    /// Read the environment and config file, then layer everything
    pub fn load(cli: &CliOverrides) -> Result<Self> {
        let env = EnvConfig::load();
        let path = cli
            .config
            .clone()
            .or_else(|| env.config_file.as_ref().map(PathBuf::from));
        let file = FileConfig::load_or_discover(path.as_deref())?;
        Self::resolve(cli, &env, &file)
    }

    /// Layer the sources over the defaults and validate the result
    pub fn resolve(cli: &CliOverrides, env: &EnvConfig, file: &FileConfig) -> Result<Self> {
        let defaults = Self::default();

        let formats = if !cli.formats.is_empty() {
            parse_formats(cli.formats.iter().map(String::as_str))?
        } else if let Some(format) = &env.format {
            parse_formats(std::iter::once(format.as_str()))?
        } else if !file.formats.is_empty() {
            parse_formats(file.formats.iter().map(String::as_str))?
        } else {
            defaults.formats
        };

        let config = Self {
            workers: cli.workers.or(env.workers).or(file.workers).unwrap_or(defaults.workers),
            formats,
            endpoints: Endpoints {
                dispatch: cli
                    .dispatch_endpoint
                    .clone()
                    .or_else(|| env.dispatch_endpoint.clone())
                    .or_else(|| file.dispatch_endpoint.clone())
                    .unwrap_or(defaults.endpoints.dispatch),
                sink: cli
                    .sink_endpoint
                    .clone()
                    .or_else(|| env.sink_endpoint.clone())
                    .or_else(|| file.sink_endpoint.clone())
                    .unwrap_or(defaults.endpoints.sink),
            },
            command: cli
                .command
                .clone()
                .or_else(|| env.command.clone())
                .or_else(|| file.command.clone()),
            verbose: cli.verbose || env.verbose(),
            connect_timeout: file
                .connect_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            reap_grace: file
                .reap_grace_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.reap_grace),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("Worker count must be at least 1");
        }
        if self.formats.is_empty() {
            bail!("At least one output format is required");
        }
        for endpoint in [&self.endpoints.dispatch, &self.endpoints.sink] {
            if let Err(e) = endpoint.parse::<Endpoint>() {
                bail!("Invalid endpoint '{endpoint}': {e}");
            }
        }
        if self.endpoints.dispatch == self.endpoints.sink {
            bail!("Dispatch and sink endpoints must differ");
        }
        Ok(())
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            verbose: self.verbose,
            connect_timeout: self.connect_timeout,
        }
    }
}

/// Parse format names; each entry may itself be comma separated
pub fn parse_formats<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<Vec<OutputFormat>> {
    let mut formats = Vec::new();
    for name in names.into_iter().flat_map(|n| n.split(',')) {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        match OutputFormat::from_str(name) {
            Some(format) if !formats.contains(&format) => formats.push(format),
            Some(_) => {}
            None => bail!("Unknown output format '{name}' (expected console, json, csv or summary)"),
        }
    }
    Ok(formats)
}
