//! Worker configuration.

use std::time::Duration;

use crate::polling::PollLimits;
use crate::retry::RetryConfig;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent submissions
    pub max_concurrent_submissions: usize,
    /// Maximum concurrent poll iterations
    pub max_concurrent_polls: usize,
    /// Repeat interval of each poll job
    pub poll_interval: Duration,
    /// Period of the global poll ticker
    pub poll_tick: Duration,
    /// Submission attempts per request
    pub submit_max_attempts: u32,
    /// Backoff before the second attempt; doubles afterwards
    pub submit_backoff_base: Duration,
    /// Consecutive transient provider errors before a poll job fails
    pub poll_max_consecutive_errors: u32,
    /// Poll invocations before a job that never settles fails
    pub poll_max_attempts: u32,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// How often queue health is logged
    pub monitor_interval: Duration,
    /// How often the worker should scan for orphaned pending submissions
    pub claim_interval: Duration,
    /// Minimum idle time before a pending submission can be claimed (crash recovery)
    pub claim_min_idle: Duration,
    /// Port for the Prometheus scrape endpoint, disabled when unset
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_submissions: 4,
            max_concurrent_polls: 16,
            poll_interval: Duration::from_secs(10),
            poll_tick: Duration::from_millis(1000),
            submit_max_attempts: 3,
            submit_backoff_base: Duration::from_millis(1000),
            poll_max_consecutive_errors: 5,
            poll_max_attempts: 10,
            shutdown_timeout: Duration::from_secs(30),
            monitor_interval: Duration::from_secs(60),
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(300), // 5 minutes
            metrics_port: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_submissions: env_parse("WORKER_MAX_SUBMISSIONS")
                .unwrap_or(defaults.max_concurrent_submissions),
            max_concurrent_polls: env_parse("WORKER_MAX_POLLS")
                .unwrap_or(defaults.max_concurrent_polls),
            poll_interval: Duration::from_secs(env_parse("POLL_INTERVAL_SECS").unwrap_or(10)),
            poll_tick: Duration::from_millis(env_parse("POLL_TICK_MS").unwrap_or(1000)),
            submit_max_attempts: env_parse("SUBMIT_MAX_ATTEMPTS")
                .unwrap_or(defaults.submit_max_attempts),
            submit_backoff_base: Duration::from_millis(
                env_parse("SUBMIT_BACKOFF_BASE_MS").unwrap_or(1000),
            ),
            poll_max_consecutive_errors: env_parse("POLL_MAX_CONSECUTIVE_ERRORS")
                .unwrap_or(defaults.poll_max_consecutive_errors),
            poll_max_attempts: env_parse("POLL_MAX_ATTEMPTS")
                .unwrap_or(defaults.poll_max_attempts),
            shutdown_timeout: Duration::from_secs(
                env_parse("WORKER_SHUTDOWN_TIMEOUT").unwrap_or(30),
            ),
            monitor_interval: Duration::from_secs(
                env_parse("WORKER_MONITOR_INTERVAL_SECS").unwrap_or(60),
            ),
            claim_interval: Duration::from_secs(
                env_parse("WORKER_CLAIM_INTERVAL_SECS").unwrap_or(30),
            ),
            claim_min_idle: Duration::from_secs(
                env_parse("WORKER_CLAIM_MIN_IDLE_SECS").unwrap_or(300),
            ),
            metrics_port: env_parse("WORKER_METRICS_PORT"),
        }
    }

    /// Backoff policy for whole-submission retries.
    pub fn submit_retry(&self) -> RetryConfig {
        RetryConfig::new("submission")
            .with_max_attempts(self.submit_max_attempts)
            .with_base_delay(self.submit_backoff_base)
    }

    pub fn poll_limits(&self) -> PollLimits {
        PollLimits {
            max_consecutive_errors: self.poll_max_consecutive_errors,
            max_polls: self.poll_max_attempts,
        }
    }
}
