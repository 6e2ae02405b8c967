//! Logging utilities
//!
//! Diagnostics go to stderr so formatter output on stdout stays clean.

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Log level configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Warn,
}

impl LogLevel {
    pub fn from_verbose(verbose: bool) -> Self {
        if verbose {
            LogLevel::Debug
        } else {
            LogLevel::Warn
        }
    }

    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Warn => Level::WARN,
        }
    }
}

/// Filter used when `RUST_LOG` is not set
pub fn default_filter(level: LogLevel) -> String {
    format!("flotilla={}", level.to_tracing_level())
}

/// Initialize the logger. `RUST_LOG` overrides the level when set.
pub fn init_logger(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(level)));

    // A second init (tests, re-entry) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        assert_eq!(default_filter(LogLevel::from_verbose(false)), "flotilla=WARN");
        assert_eq!(default_filter(LogLevel::from_verbose(true)), "flotilla=DEBUG");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_logger(LogLevel::Warn);
        init_logger(LogLevel::Debug);
    }
}
