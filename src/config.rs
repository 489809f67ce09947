//! Configuration management for the Grafana Cloud secrets service.
//!
//! Configuration can be set via environment variables:
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `8200`.
//! - `STORAGE_TYPE` - Optional. `memory`, `file` or `sqlite`. Defaults to `file`.
//! - `DATA_DIR` - Optional. Directory for file/sqlite storage. Defaults to `./data`.
//! - `HTTP_DEBUG` - Optional. Any non-empty value logs Grafana Cloud request outcomes.
//! - `REMOTE_MAX_ATTEMPTS` - Optional. Attempts per remote call, including the first. Defaults to `6`.
//! - `REMOTE_RETRY_BACKOFF_SECS` - Optional. Fixed wait between attempts. Defaults to `10`.
//! - `REMOTE_REQUEST_TIMEOUT_SECS` - Optional. Timeout per attempt. Defaults to `10`.
//! - `REVOKE_NOT_FOUND` - Optional. `error` or `ignore`. Defaults to `error`.
//!
//! The Grafana Cloud endpoint and admin key are not process configuration;
//! they are written at runtime through the `/config` API.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::backend::{BackendOptions, RevokeNotFoundPolicy};
use crate::client::{ClientOptions, RetryPolicy};
use crate::storage::StorageType;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    pub storage_type: StorageType,

    /// Directory holding `storage.json` / `storage.db`
    pub data_dir: PathBuf,

    /// Log Grafana Cloud request outcomes and failed response bodies
    pub http_debug: bool,

    pub retry_policy: RetryPolicy,

    pub revoke_not_found: RevokeNotFoundPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8200,
            storage_type: StorageType::default(),
            data_dir: PathBuf::from("./data"),
            http_debug: false,
            retry_policy: RetryPolicy::default(),
            revoke_not_found: RevokeNotFoundPolicy::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a numeric or enumerated variable
    /// cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let host = lookup("HOST").unwrap_or(defaults.host);

        let port = parse_var(&lookup, "PORT")?.unwrap_or(defaults.port);

        let storage_type = match lookup("STORAGE_TYPE") {
            Some(value) => StorageType::from_str(&value).ok_or_else(|| {
                ConfigError::InvalidValue(
                    "STORAGE_TYPE".to_string(),
                    format!("expected 'memory', 'file' or 'sqlite', got '{}'", value),
                )
            })?,
            None => defaults.storage_type,
        };

        let data_dir = lookup("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let http_debug = lookup("HTTP_DEBUG").is_some_and(|v| !v.is_empty());

        let max_attempts: u32 = parse_var(&lookup, "REMOTE_MAX_ATTEMPTS")?
            .unwrap_or(defaults.retry_policy.max_attempts);
        if max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "REMOTE_MAX_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let backoff = parse_var(&lookup, "REMOTE_RETRY_BACKOFF_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.retry_policy.backoff);

        let request_timeout = parse_var(&lookup, "REMOTE_REQUEST_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.retry_policy.request_timeout);

        let revoke_not_found = match lookup("REVOKE_NOT_FOUND") {
            Some(value) => RevokeNotFoundPolicy::from_str(&value).ok_or_else(|| {
                ConfigError::InvalidValue(
                    "REVOKE_NOT_FOUND".to_string(),
                    format!("expected 'error' or 'ignore', got '{}'", value),
                )
            })?,
            None => defaults.revoke_not_found,
        };

        Ok(Self {
            host,
            port,
            storage_type,
            data_dir,
            http_debug,
            retry_policy: RetryPolicy {
                max_attempts,
                backoff,
                request_timeout,
            },
            revoke_not_found,
        })
    }

    /// Engine options derived from this configuration.
    pub fn backend_options(&self) -> BackendOptions {
        BackendOptions {
            client: ClientOptions {
                retry_policy: self.retry_policy.clone(),
                debug: self.http_debug,
                ..ClientOptions::default()
            },
            revoke_not_found: self.revoke_not_found,
        }
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    lookup(name)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("{}", e)))
        })
        .transpose()
}
