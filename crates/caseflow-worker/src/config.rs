//! Worker configuration from environment variables.
//!
//! `DATABASE_URL` is required; everything else has a default. A `.env` file
//! in the working directory is loaded first when present.

use caseflow::TenantScope;
use caseflow_outbox::{DrainConfig, RetryPolicy, DEFAULT_BATCH_SIZE, DEFAULT_INTERVAL};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_MAX_CONNECTIONS: u32 = 16;
const DEFAULT_LEASE_MS: i64 = 60_000;
const DEFAULT_BACKOFF_MAX_MS: u64 = 300_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("{name} has invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub lease_ms: i64,
    pub tenant_scope: TenantScope,
    pub drain: DrainConfig,
    pub log_json: bool,
}

impl WorkerConfig {
    /// Read the process environment, after loading `.env` if one exists.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let max_connections = parse_positive::<u32, _>(&lookup, "DATABASE_MAX_CONNECTIONS")?
            .unwrap_or(DEFAULT_MAX_CONNECTIONS);
        let lease_ms =
            parse_positive::<i64, _>(&lookup, "CASEFLOW_LEASE_MS")?.unwrap_or(DEFAULT_LEASE_MS);

        let interval = parse_positive::<u64, _>(&lookup, "CASEFLOW_POLL_INTERVAL_MS")?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_INTERVAL);
        let batch_size = parse_positive::<usize, _>(&lookup, "CASEFLOW_BATCH_SIZE")?
            .unwrap_or(DEFAULT_BATCH_SIZE);

        let mut retry = match parse_positive::<u32, _>(&lookup, "CASEFLOW_MAX_ATTEMPTS")? {
            Some(max_attempts) => RetryPolicy::bounded(max_attempts),
            None => RetryPolicy::unbounded(),
        };
        let backoff_max = parse_positive::<u64, _>(&lookup, "CASEFLOW_BACKOFF_MAX_MS")?;
        match parse_positive::<u64, _>(&lookup, "CASEFLOW_BACKOFF_BASE_MS")? {
            Some(base) => {
                retry = retry.with_backoff(
                    Duration::from_millis(base),
                    Duration::from_millis(backoff_max.unwrap_or(DEFAULT_BACKOFF_MAX_MS)),
                );
            }
            None if backoff_max.is_some() => {
                return Err(ConfigError::Invalid {
                    name: "CASEFLOW_BACKOFF_MAX_MS",
                    value: lookup("CASEFLOW_BACKOFF_MAX_MS").unwrap_or_default(),
                    reason: "requires CASEFLOW_BACKOFF_BASE_MS".into(),
                });
            }
            None => {}
        }

        let tenant_scope = match lookup("CASEFLOW_TENANT_SCOPE").as_deref().map(str::trim) {
            None | Some("") | Some("global") => TenantScope::GlobalFallback,
            Some("exact") => TenantScope::Exact,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "CASEFLOW_TENANT_SCOPE",
                    value: other.to_string(),
                    reason: "expected `global` or `exact`".into(),
                })
            }
        };

        let log_json = match lookup("CASEFLOW_LOG_JSON").as_deref().map(str::trim) {
            None | Some("") | Some("0") | Some("false") => false,
            Some("1") | Some("true") => true,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "CASEFLOW_LOG_JSON",
                    value: other.to_string(),
                    reason: "expected a boolean".into(),
                })
            }
        };

        Ok(Self {
            database_url,
            max_connections,
            lease_ms,
            tenant_scope,
            drain: DrainConfig::default()
                .with_interval(interval)
                .with_batch_size(batch_size)
                .with_retry(retry),
            log_json,
        })
    }
}

/// Parse an optional strictly positive number.
fn parse_positive<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    let invalid = |reason: String| ConfigError::Invalid {
        name,
        value: raw.clone(),
        reason,
    };

    let value = raw.trim().parse::<T>().map_err(|e| invalid(e.to_string()))?;
    if value <= T::default() {
        return Err(invalid("must be greater than zero".into()));
    }
    Ok(Some(value))
}
