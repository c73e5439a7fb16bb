//! Process configuration.
//!
//! Built once at startup from `MEDSTOCK_*` environment variables and passed by
//! reference to whatever needs it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use medstock_observability::LogFormat;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_ADMIN_EMAIL: &str = "admin@medstock.local";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Postgres connection string; `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub max_connections: u32,
    /// How long a transaction waits for a row lock before failing.
    pub lock_timeout_ms: u64,
    /// Account ensured to exist as superuser with the ADMIN role.
    pub default_admin_email: String,
    pub log_format: LogFormat,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            default_admin_email: DEFAULT_ADMIN_EMAIL.to_string(),
            log_format: LogFormat::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let max_connections = match get("MEDSTOCK_MAX_CONNECTIONS") {
            Some(raw) => parse_positive("MEDSTOCK_MAX_CONNECTIONS", &raw)?,
            None => defaults.max_connections,
        };
        let lock_timeout_ms = match get("MEDSTOCK_LOCK_TIMEOUT_MS") {
            Some(raw) => parse_positive("MEDSTOCK_LOCK_TIMEOUT_MS", &raw)?,
            None => defaults.lock_timeout_ms,
        };
        let log_format = match get("MEDSTOCK_LOG_FORMAT") {
            Some(raw) => raw.parse().map_err(|e: medstock_observability::ParseLogFormatError| {
                ConfigError::Invalid {
                    var: "MEDSTOCK_LOG_FORMAT",
                    reason: e.to_string(),
                }
            })?,
            None => defaults.log_format,
        };

        Ok(Self {
            database_url: get("MEDSTOCK_DATABASE_URL"),
            max_connections,
            lock_timeout_ms,
            default_admin_email: get("MEDSTOCK_DEFAULT_ADMIN_EMAIL")
                .unwrap_or(defaults.default_admin_email),
            log_format,
        })
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

fn parse_positive<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: core::str::FromStr + PartialEq + Default,
{
    match raw.parse::<T>() {
        Ok(v) if v != T::default() => Ok(v),
        _ => Err(ConfigError::Invalid {
            var,
            reason: format!("expected a positive integer, got '{raw}'"),
        }),
    }
}
