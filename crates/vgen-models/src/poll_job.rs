//! Recurring poll job definitions.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::request::{prompt_from_params, RequestId, VideoRequest};

/// Recurring unit of work that checks provider progress for one request.
///
/// `poll_count` is 0 until the first invocation is handed out, then grows by
/// exactly one per invocation and is never reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PollJob {
    /// Internal request ID
    pub request_id: RequestId,
    /// Provider endpoint identifier
    pub provider: String,
    /// Provider-side request ID
    pub provider_request_id: String,
    /// Number of invocations so far
    #[serde(default)]
    pub poll_count: u32,
    /// Current streak of transient provider errors
    #[serde(default)]
    pub consecutive_errors: u32,
    /// Owning user, needed for asset persistence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Original input parameters, needed for asset persistence
    #[serde(default)]
    pub params: serde_json::Value,
    /// Notification feed entry tracking this job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_id: Option<String>,
    /// When polling was scheduled
    pub registered_at: DateTime<Utc>,
}

impl PollJob {
    /// Build the poll job for an accepted submission.
    pub fn for_request(request: &VideoRequest, provider_request_id: impl Into<String>) -> Self {
        Self {
            request_id: request.id.clone(),
            provider: request.provider.clone(),
            provider_request_id: provider_request_id.into(),
            poll_count: 0,
            consecutive_errors: 0,
            user_id: request.user_id.clone(),
            params: request.params.clone(),
            notification_id: request.notification_id.clone(),
            registered_at: Utc::now(),
        }
    }

    /// Set the notification ID.
    pub fn with_notification_id(mut self, id: Option<String>) -> Self {
        self.notification_id = id;
        self
    }

    pub fn prompt(&self) -> Option<&str> {
        prompt_from_params(&self.params)
    }
}
