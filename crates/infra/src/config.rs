//! Runtime configuration for the infrastructure adapters.
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `DATABASE_URL` | unset | Postgres connection string; unset selects the in-memory store |
//! | `SITEGATE_DB_MAX_CONNECTIONS` | `5` | Pool size |

use thiserror::Error;

pub const DATABASE_URL: &str = "DATABASE_URL";
pub const DB_MAX_CONNECTIONS: &str = "SITEGATE_DB_MAX_CONNECTIONS";

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateConfig {
    pub database_url: Option<String>,
    pub db_max_connections: u32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            db_max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl GateConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup(DATABASE_URL)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let db_max_connections = match lookup(DB_MAX_CONNECTIONS) {
            None => DEFAULT_MAX_CONNECTIONS,
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => n,
                Ok(_) => {
                    return Err(ConfigError::InvalidValue {
                        key: DB_MAX_CONNECTIONS,
                        value: raw,
                        reason: "must be at least 1",
                    });
                }
                Err(_) => {
                    return Err(ConfigError::InvalidValue {
                        key: DB_MAX_CONNECTIONS,
                        value: raw,
                        reason: "not a positive integer",
                    });
                }
            },
        };

        Ok(Self {
            database_url,
            db_max_connections,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_to_in_memory() {
        let config = GateConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, GateConfig::default());
    }

    #[test]
    fn reads_database_settings() {
        let config = GateConfig::from_lookup(lookup(&[
            (DATABASE_URL, "postgres://localhost/sitegate"),
            (DB_MAX_CONNECTIONS, "12"),
        ]))
        .unwrap();
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/sitegate"));
        assert_eq!(config.db_max_connections, 12);
    }

    #[test]
    fn blank_database_url_is_unset() {
        let config = GateConfig::from_lookup(lookup(&[(DATABASE_URL, "  ")])).unwrap();
        assert_eq!(config.database_url, None);
    }

    #[test]
    fn rejects_bad_pool_size() {
        for bad in ["0", "-3", "lots"] {
            let err = GateConfig::from_lookup(lookup(&[(DB_MAX_CONNECTIONS, bad)])).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue { key: DB_MAX_CONNECTIONS, .. }));
        }
    }
}
