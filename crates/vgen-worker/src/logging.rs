//! Structured job logging utilities.
//!
//! Provides consistent, structured logging for submissions and poll
//! iterations with the request ID and provider attached to every line.

use tracing::{error, info, warn, Span};
use vgen_models::RequestId;

/// Job logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct JobLogger {
    request_id: String,
    provider: String,
    operation: &'static str,
}

impl JobLogger {
    /// Create a new job logger for a specific request and operation.
    ///
    /// # Arguments
    /// * `request_id` - Internal request ID
    /// * `provider` - Provider endpoint the request targets
    /// * `operation` - The stage (e.g., "submission", "poll")
    pub fn new(request_id: &RequestId, provider: &str, operation: &'static str) -> Self {
        Self {
            request_id: request_id.to_string(),
            provider: provider.to_string(),
            operation,
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            request_id = %self.request_id,
            provider = %self.provider,
            operation = self.operation,
            "Job started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            request_id = %self.request_id,
            provider = %self.provider,
            operation = self.operation,
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            request_id = %self.request_id,
            provider = %self.provider,
            operation = self.operation,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            request_id = %self.request_id,
            provider = %self.provider,
            operation = self.operation,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            request_id = %self.request_id,
            provider = %self.provider,
            operation = self.operation,
            "Job completed: {}", message
        );
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn operation(&self) -> &str {
        self.operation
    }

    /// Create a tracing span for this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            request_id = %self.request_id,
            provider = %self.provider,
            operation = self.operation
        )
    }
}
