//! Application state.

use std::sync::Arc;

use async_trait::async_trait;

use vgen_models::VideoRequest;
use vgen_queue::{JobQueue, QueueResult};
use vgen_store::{JobStore, RedisJobStore};

use crate::config::ApiConfig;

/// Submission intake as seen by the API.
#[async_trait]
pub trait SubmissionQueue: Send + Sync {
    /// Enqueue a submission, returning the stream message ID.
    async fn enqueue_submission(&self, request: VideoRequest) -> QueueResult<String>;

    /// Messages waiting in the submission stream.
    async fn len(&self) -> QueueResult<u64>;
}

#[async_trait]
impl SubmissionQueue for JobQueue {
    async fn enqueue_submission(&self, request: VideoRequest) -> QueueResult<String> {
        JobQueue::enqueue_submission(self, request).await
    }

    async fn len(&self) -> QueueResult<u64> {
        JobQueue::len(self).await
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<dyn SubmissionQueue>,
}

impl AppState {
    /// Create new application state.
    pub async fn new(config: ApiConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let store = RedisJobStore::from_env().await?;
        let queue = JobQueue::from_env().await?;
        queue.init().await?;

        Ok(Self::from_parts(config, Arc::new(store), Arc::new(queue)))
    }

    /// Assemble state from already constructed collaborators.
    pub fn from_parts(
        config: ApiConfig,
        store: Arc<dyn JobStore>,
        queue: Arc<dyn SubmissionQueue>,
    ) -> Self {
        Self {
            config,
            store,
            queue,
        }
    }
}
