// Environment-driven configuration shared by the worker, the API and the CLI

use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid value {value:?} for {name}: {reason}")]
pub struct ConfigError {
    pub name: &'static str,
    pub value: String,
    pub reason: String,
}

/// Reads an environment variable, falling back to `default` when unset.
pub fn env_or<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError {
            name,
            value: raw,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Connection settings for the external execution service
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub base_url: String,
    pub api_token: Option<String>,
    /// Added on top of the summed per-case timeouts.
    pub grace: Duration,
    /// Upper bound for one executor call; never below the summed timeouts.
    pub max_deadline: Duration,
    pub max_retries: u32,
    pub retry_base: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            api_token: None,
            grace: Duration::from_millis(5_000),
            max_deadline: Duration::from_millis(120_000),
            max_retries: 2,
            retry_base: Duration::from_millis(200),
        }
    }
}

impl ExecutorSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            base_url: env_or("EXECUTOR_URL", defaults.base_url)?,
            api_token: std::env::var("EXECUTOR_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
            grace: Duration::from_millis(env_or("EXECUTOR_GRACE_MS", 5_000u64)?),
            max_deadline: Duration::from_millis(env_or("EXECUTOR_MAX_DEADLINE_MS", 120_000u64)?),
            max_retries: env_or("EXECUTOR_MAX_RETRIES", defaults.max_retries)?,
            retry_base: Duration::from_millis(env_or("EXECUTOR_RETRY_BASE_MS", 200u64)?),
        })
    }
}

/// Queue-level retry policy for evaluations that hit infrastructure errors
#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base: Duration::from_millis(1_000),
            backoff_max: Duration::from_millis(60_000),
        }
    }
}

impl RetrySettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            max_attempts: env_or("EVALUATION_MAX_ATTEMPTS", 5u32)?,
            backoff_base: Duration::from_millis(env_or("EVALUATION_BACKOFF_BASE_MS", 1_000u64)?),
            backoff_max: Duration::from_millis(env_or("EVALUATION_BACKOFF_MAX_MS", 60_000u64)?),
        })
    }
}

pub fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}
