// Runtime configuration for the grader worker
use grader_common::config::{self, env_or, ConfigError, ExecutorSettings, RetrySettings};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub redis_url: String,
    /// Maximum evaluations in flight at once
    pub concurrency: usize,
    pub executor: ExecutorSettings,
    pub retry: RetrySettings,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let concurrency = env_or("WORKER_CONCURRENCY", 4usize)?;
        if concurrency == 0 {
            return Err(ConfigError {
                name: "WORKER_CONCURRENCY",
                value: concurrency.to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            redis_url: config::redis_url(),
            concurrency,
            executor: ExecutorSettings::from_env()?,
            retry: RetrySettings::from_env()?,
        })
    }
}
