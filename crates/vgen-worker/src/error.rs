//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Missing provider request id")]
    MissingProviderRequestId,

    #[error("Video URL not found in provider result")]
    VideoUrlNotFound,

    #[error("{0}")]
    GenerationFailed(String),

    #[error("Polling limit exceeded")]
    PollingLimitExceeded,

    #[error("Store error: {0}")]
    Store(#[from] vgen_store::StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] vgen_queue::QueueError),

    #[error("Provider error: {0}")]
    Provider(#[from] vgen_provider::ProviderError),

    #[error("Service error: {0}")]
    Service(#[from] vgen_services::ServiceError),
}

impl WorkerError {
    pub fn generation_failed(msg: impl Into<String>) -> Self {
        Self::GenerationFailed(msg.into())
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Provider(e) => e.is_retryable(),
            WorkerError::Service(e) => e.is_retryable(),
            WorkerError::Store(_) | WorkerError::Queue(_) => true,
            _ => false,
        }
    }

    /// Short message safe to show in the notification feed.
    pub fn user_message(&self) -> String {
        match self {
            WorkerError::Provider(vgen_provider::ProviderError::Unauthorized { .. }) => {
                "Video provider rejected the request".to_string()
            }
            WorkerError::Provider(vgen_provider::ProviderError::NotFound(_)) => {
                "Video generation request was not found".to_string()
            }
            WorkerError::Provider(_) => "Video provider is unavailable".to_string(),
            WorkerError::Store(_) | WorkerError::Queue(_) | WorkerError::Service(_) => {
                "Internal error while generating video".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerError::MissingProviderRequestId => "missing_provider_request_id",
            WorkerError::VideoUrlNotFound => "video_url_not_found",
            WorkerError::GenerationFailed(_) => "generation_failed",
            WorkerError::PollingLimitExceeded => "polling_limit_exceeded",
            WorkerError::Store(_) => "store",
            WorkerError::Queue(_) => "queue",
            WorkerError::Provider(e) => e.kind(),
            WorkerError::Service(_) => "service",
        }
    }
}
