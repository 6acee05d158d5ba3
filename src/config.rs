//! Runner configuration
//!
//! Built in code through [`BatchConfig::default`] and struct update syntax, or
//! loaded once from environment variables with [`BatchConfig::from_env`].

use std::time::Duration;

use crate::batch::ExecutionStrategy;
use crate::{BatchError, Result};

/// Environment variable holding the concurrency limit
pub const ENV_CONCURRENCY_LIMIT: &str = "BATCH_CONCURRENCY_LIMIT";
/// Environment variable holding the per-task timeout in milliseconds
pub const ENV_TASK_TIMEOUT_MS: &str = "BATCH_TASK_TIMEOUT_MS";
/// Environment variable holding the whole-batch deadline in milliseconds
pub const ENV_DEADLINE_MS: &str = "BATCH_DEADLINE_MS";
/// Environment variable selecting `spawn` or `pool`
pub const ENV_STRATEGY: &str = "BATCH_STRATEGY";
/// Environment variable holding the default log filter
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";

/// Batch execution configuration
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    /// Maximum number of tasks executing at once
    pub concurrency_limit: usize,
    /// Limit on a single task's execution time
    pub task_timeout: Option<Duration>,
    /// Limit on the whole batch; un-admitted tasks are skipped once it elapses
    pub deadline: Option<Duration>,
    /// How activations are launched
    pub strategy: ExecutionStrategy,
    /// Default `tracing` filter when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: num_cpus::get().max(1),
            task_timeout: None,
            deadline: None,
            strategy: ExecutionStrategy::default(),
            log_level: "info".to_string(),
        }
    }
}

impl BatchConfig {
    /// Create a configuration with the given limit and defaults elsewhere
    pub fn with_limit(concurrency_limit: usize) -> Self {
        Self {
            concurrency_limit,
            ..Default::default()
        }
    }

    /// Check the configuration before any task is launched
    pub fn validate(&self) -> Result<()> {
        if self.concurrency_limit == 0 {
            return Err(BatchError::Configuration(
                "concurrency limit must be at least 1".to_string(),
            ));
        }
        if self.task_timeout == Some(Duration::ZERO) {
            return Err(BatchError::Configuration(
                "task timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    ///
    /// Unset keys keep their defaults; set keys must parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_CONCURRENCY_LIMIT) {
            config.concurrency_limit = parse_limit(&raw)?;
        }
        if let Some(raw) = lookup(ENV_TASK_TIMEOUT_MS) {
            config.task_timeout = Some(parse_millis(ENV_TASK_TIMEOUT_MS, &raw)?);
        }
        if let Some(raw) = lookup(ENV_DEADLINE_MS) {
            config.deadline = Some(parse_millis(ENV_DEADLINE_MS, &raw)?);
        }
        if let Some(raw) = lookup(ENV_STRATEGY) {
            config.strategy = raw.parse()?;
        }
        if let Some(raw) = lookup(ENV_LOG_LEVEL) {
            config.log_level = raw;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_limit(raw: &str) -> Result<usize> {
    let value: i64 = raw.trim().parse().map_err(|_| {
        BatchError::Configuration(format!(
            "{} must be a positive integer, got '{}'",
            ENV_CONCURRENCY_LIMIT, raw
        ))
    })?;
    if value < 1 {
        return Err(BatchError::Configuration(format!(
            "{} must be a positive integer, got {}",
            ENV_CONCURRENCY_LIMIT, value
        )));
    }
    usize::try_from(value).map_err(|_| {
        BatchError::Configuration(format!("{} is out of range: {}", ENV_CONCURRENCY_LIMIT, value))
    })
}

fn parse_millis(key: &str, raw: &str) -> Result<Duration> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| {
            BatchError::Configuration(format!(
                "{} must be a number of milliseconds, got '{}'",
                key, raw
            ))
        })
}
