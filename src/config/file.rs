//! Configuration file management
//!
//! Finds and loads the optional `.flotilla` file. Every field is optional;
//! anything left out falls through to the built-in defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration file locations, in order of precedence
const CONFIG_LOCATIONS: &[&str] = &[".flotilla.yml", ".flotilla.yaml", ".flotilla.json"];

/// Configuration file structure
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Worker process count
    pub workers: Option<usize>,

    /// Output formats
    pub formats: Vec<String>,

    /// Dispatch endpoint
    pub dispatch_endpoint: Option<String>,

    /// Sink endpoint
    pub sink_endpoint: Option<String>,

    /// Framework executable override
    pub command: Option<String>,

    /// Seconds a worker waits for the sink to come up
    pub connect_timeout_secs: Option<u64>,

    /// Seconds to wait for workers after the verdict before killing them
    pub reap_grace_secs: Option<u64>,
}

impl FileConfig {
    /// Find a configuration file in `dir`
    pub fn find(dir: impl AsRef<Path>) -> Option<PathBuf> {
        CONFIG_LOCATIONS
            .iter()
            .map(|name| dir.as_ref().join(name))
            .find(|path| path.is_file())
    }

    /// Load from `path`, or from the first file found in the working
    /// directory, or fall back to an empty config
    pub fn load_or_discover(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        let cwd = std::env::current_dir().context("Failed to read working directory")?;
        match Self::find(cwd) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        Ok(config)
    }
}

/// Check if file is YAML based on extension
fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}
