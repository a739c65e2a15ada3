//! Tracing/logging initialization.
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `RUST_LOG` | unset | Standard `EnvFilter` directives; wins over `SITEGATE_LOG` |
//! | `SITEGATE_LOG` | `info` | Filter directives when `RUST_LOG` is unset |
//! | `SITEGATE_LOG_FORMAT` | `json` | `json` or `pretty` |

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub const LOG_FILTER: &str = "SITEGATE_LOG";
pub const LOG_FORMAT: &str = "SITEGATE_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TracingConfigError {
    #[error("unknown log format '{0}' (expected 'json' or 'pretty')")]
    UnknownFormat(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingConfig {
    pub filter: String,
    pub format: LogFormat,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

impl TracingConfig {
    pub fn from_env() -> Result<Self, TracingConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, TracingConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let filter = lookup(LOG_FILTER)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.filter);
        let format = match lookup(LOG_FORMAT).map(|v| v.trim().to_ascii_lowercase()) {
            None => defaults.format,
            Some(v) if v.is_empty() || v == "json" => LogFormat::Json,
            Some(v) if v == "pretty" => LogFormat::Pretty,
            Some(other) => return Err(TracingConfigError::UnknownFormat(other)),
        };
        Ok(Self { filter, format })
    }
}

/// Install the global subscriber described by `config`.
///
/// `RUST_LOG` overrides `config.filter`. Returns false if a subscriber was
/// already installed (the call is then a no-op).
pub fn init_with(config: &TracingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime);

    match config.format {
        LogFormat::Json => builder.json().with_target(false).try_init().is_ok(),
        LogFormat::Pretty => builder.pretty().try_init().is_ok(),
    }
}
