//! Job status records kept in the job store.
//!
//! Two records describe the same job with different retention: the
//! [`VideoStatus`] lives indefinitely, while the [`CachedResult`] is a
//! short-lived snapshot stored with an expiration.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::request::RequestId;

/// Lifecycle state of a generation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum VideoState {
    /// Provider has the job queued
    #[default]
    Pending,
    /// Submitted or actively generating
    Processing,
    /// Video is ready
    Completed,
    /// Generation failed
    Failed,
}

impl VideoState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoState::Pending => "pending",
            VideoState::Processing => "processing",
            VideoState::Completed => "completed",
            VideoState::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, VideoState::Completed | VideoState::Failed)
    }
}

impl std::fmt::Display for VideoState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Current status of a generation job.
///
/// Written with overwrite semantics: each write replaces the whole record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VideoStatus {
    /// Internal request ID
    pub request_id: RequestId,
    /// Provider-side request ID, once the provider accepted the job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_request_id: Option<String>,
    /// Current state
    pub status: VideoState,
    /// Result payload for completed jobs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Human-readable error for failed jobs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Notification feed entry tracking this job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_id: Option<String>,
    /// When the record was last written
    pub updated_at: DateTime<Utc>,
}

impl VideoStatus {
    fn with_state(request_id: RequestId, status: VideoState) -> Self {
        Self {
            request_id,
            provider_request_id: None,
            status,
            result: None,
            error: None,
            notification_id: None,
            updated_at: Utc::now(),
        }
    }

    pub fn pending(request_id: RequestId) -> Self {
        Self::with_state(request_id, VideoState::Pending)
    }

    pub fn processing(request_id: RequestId) -> Self {
        Self::with_state(request_id, VideoState::Processing)
    }

    /// Completed status carrying the output video URL and the raw provider data.
    pub fn completed(request_id: RequestId, video_url: &str, data: serde_json::Value) -> Self {
        let mut status = Self::with_state(request_id, VideoState::Completed);
        status.result = Some(serde_json::json!({
            "video_url": video_url,
            "data": data,
        }));
        status
    }

    pub fn failed(request_id: RequestId, error: impl Into<String>) -> Self {
        let mut status = Self::with_state(request_id, VideoState::Failed);
        status.error = Some(error.into());
        status
    }

    /// Set the provider request ID.
    pub fn with_provider_request_id(mut self, id: Option<String>) -> Self {
        self.provider_request_id = id;
        self
    }

    /// Set the notification ID.
    pub fn with_notification_id(mut self, id: Option<String>) -> Self {
        self.notification_id = id;
        self
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Output video URL of a completed job.
    pub fn video_url(&self) -> Option<&str> {
        self.result
            .as_ref()
            .and_then(|r| r.get("video_url"))
            .and_then(|v| v.as_str())
    }
}

/// Time-limited snapshot of a job outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CachedResult {
    /// Internal request ID
    pub request_id: RequestId,
    /// State at the time of caching
    pub status: VideoState,
    /// Result payload, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error message, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the snapshot was taken
    pub cached_at: DateTime<Utc>,
}

impl From<&VideoStatus> for CachedResult {
    fn from(status: &VideoStatus) -> Self {
        Self {
            request_id: status.request_id.clone(),
            status: status.status,
            result: status.result.clone(),
            error: status.error.clone(),
            cached_at: Utc::now(),
        }
    }
}

/// Link from a provider request ID back to the internal request ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ProviderMapping {
    pub provider_request_id: String,
    pub request_id: RequestId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_terminal_states() {
        assert!(!VideoState::Pending.is_terminal());
        assert!(!VideoState::Processing.is_terminal());
        assert!(VideoState::Completed.is_terminal());
        assert!(VideoState::Failed.is_terminal());
    }

    #[test]
    fn test_completed_status_exposes_url() {
        let status = VideoStatus::completed(
            RequestId::from("r1"),
            "https://x/y.mp4",
            json!({"video": {"url": "https://x/y.mp4"}}),
        );

        assert!(status.is_terminal());
        assert_eq!(status.video_url(), Some("https://x/y.mp4"));
        assert!(status.error.is_none());
    }

    #[test]
    fn test_failed_status_serializes_snake_case() {
        let status = VideoStatus::failed(RequestId::from("r1"), "boom")
            .with_provider_request_id(Some("p1".into()));
        let value = serde_json::to_value(&status).unwrap();

        assert_eq!(value["status"], "failed");
        assert_eq!(value["error"], "boom");
        assert_eq!(value["provider_request_id"], "p1");
        assert!(value.get("result").is_none());
    }

    #[test]
    fn test_cached_result_from_status() {
        let status = VideoStatus::processing(RequestId::from("r1"));
        let cached = CachedResult::from(&status);

        assert_eq!(cached.request_id, status.request_id);
        assert_eq!(cached.status, VideoState::Processing);
    }
}
