//! Tracing/logging setup shared by binaries and tests.

/// Initialize process-wide logging from the environment.
///
/// Safe to call multiple times; subsequent calls become no-ops. An invalid
/// `SITEGATE_LOG_FORMAT` falls back to JSON.
pub fn init() {
    let config = tracing::TracingConfig::from_env().unwrap_or_default();
    tracing::init_with(&config);
}

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use tracing::{LogFormat, TracingConfig, TracingConfigError};
