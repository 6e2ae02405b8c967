//! Environment variable configuration
//!
//! Provides `FLOTILLA_*` overrides that sit between the command line and
//! the config file.

use std::env;

/// Environment variable prefix
const ENV_PREFIX: &str = "FLOTILLA";

/// Configuration read from environment variables
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnvConfig {
    /// Worker count from FLOTILLA_WORKERS
    pub workers: Option<usize>,
    /// Output formats from FLOTILLA_FORMAT, comma separated
    pub format: Option<String>,
    /// Dispatch endpoint from FLOTILLA_DISPATCH_ENDPOINT
    pub dispatch_endpoint: Option<String>,
    /// Sink endpoint from FLOTILLA_SINK_ENDPOINT
    pub sink_endpoint: Option<String>,
    /// Framework executable from FLOTILLA_COMMAND
    pub command: Option<String>,
    /// Verbose logging from FLOTILLA_LOG
    pub log: Option<bool>,
    /// Config file from FLOTILLA_CONFIG
    pub config_file: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            workers: get_env_parse("WORKERS"),
            format: get_env("FORMAT"),
            dispatch_endpoint: get_env("DISPATCH_ENDPOINT"),
            sink_endpoint: get_env("SINK_ENDPOINT"),
            command: get_env("COMMAND"),
            log: get_env_bool("LOG"),
            config_file: get_env("CONFIG"),
        }
    }

    pub fn verbose(&self) -> bool {
        self.log.unwrap_or(false)
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}"))
        .ok()
        .filter(|v| !v.is_empty())
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.parse().ok())
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

/// Builder for setting environment variables in tests
#[cfg(test)]
pub struct EnvBuilder {
    vars: Vec<(String, String)>,
}

#[cfg(test)]
impl EnvBuilder {
    pub fn new() -> Self {
        Self { vars: Vec::new() }
    }

    pub fn var(mut self, name: &str, value: impl Into<String>) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_{name}"), value.into()));
        self
    }

    /// Apply and return guard that restores on drop
    pub fn apply_scoped(self) -> EnvGuard {
        let previous: Vec<_> = self
            .vars
            .iter()
            .map(|(k, _)| (k.clone(), env::var(k).ok()))
            .collect();

        for (key, value) in self.vars {
            env::set_var(key, value);
        }

        EnvGuard { previous }
    }
}

/// Guard that restores environment variables on drop
#[cfg(test)]
pub struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

#[cfg(test)]
impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}
