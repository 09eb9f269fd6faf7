//! Video generation worker.
//!
//! This crate provides:
//! - Submission executor consuming the job stream
//! - Global poll scheduler driving provider status checks
//! - Completion side effects (asset persistence, notifications)
//! - Graceful shutdown

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod monitor;
pub mod polling;
pub mod retry;
pub mod scheduler;
pub mod submission;

#[cfg(test)]
mod fakes;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::SubmissionExecutor;
pub use logging::JobLogger;
pub use monitor::{QueueMonitor, QueueSnapshot};
pub use polling::{PollLimits, PollOutcome, PollReport, PollingStage};
pub use retry::{retry_async, RetryConfig, RetryResult};
pub use scheduler::PollScheduler;
pub use submission::SubmissionStage;
