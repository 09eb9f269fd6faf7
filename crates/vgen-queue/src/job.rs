//! Job types for the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vgen_models::{RequestId, VideoRequest};

/// Job to submit a generation request to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitVideoJob {
    /// The request to submit
    pub request: VideoRequest,
    /// When the job was enqueued
    pub enqueued_at: DateTime<Utc>,
}

impl SubmitVideoJob {
    pub fn new(request: VideoRequest) -> Self {
        Self {
            request,
            enqueued_at: Utc::now(),
        }
    }

    /// Generate idempotency key for deduplication.
    pub fn idempotency_key(&self) -> String {
        self.request.idempotency_key()
    }
}

/// Generic job wrapper for queue storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueJob {
    /// Hand a request to the provider and schedule polling
    SubmitVideo(SubmitVideoJob),
}

impl QueueJob {
    pub fn request_id(&self) -> &RequestId {
        match self {
            QueueJob::SubmitVideo(j) => &j.request.id,
        }
    }

    pub fn idempotency_key(&self) -> String {
        match self {
            QueueJob::SubmitVideo(j) => j.idempotency_key(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_job_submit_video_serde_roundtrip() {
        let request = VideoRequest::with_id(
            RequestId::from("r1"),
            "demo/model",
            serde_json::json!({"prompt": "waves"}),
        );
        let wrapper = QueueJob::SubmitVideo(SubmitVideoJob::new(request.clone()));

        let json = serde_json::to_value(&wrapper).expect("serialize QueueJob");
        assert_eq!(json["type"], "submit_video");

        let decoded: QueueJob = serde_json::from_value(json).expect("deserialize QueueJob");
        match decoded {
            QueueJob::SubmitVideo(j) => {
                assert_eq!(j.request, request);
                assert_eq!(j.idempotency_key(), "submit:r1");
            }
        }
    }
}
