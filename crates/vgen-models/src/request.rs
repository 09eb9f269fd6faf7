//! Generation requests and their identifiers.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Internal identifier for one generation job.
///
/// Stable for the whole lifecycle of the job and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl RequestId {
    /// Generate a new random request ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A video generation request, handed to the submission stage.
///
/// Immutable once created. `params` is passed to the provider verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VideoRequest {
    /// Internal request ID
    pub id: RequestId,
    /// Provider endpoint identifier (e.g. `owner/model/variant`)
    pub provider: String,
    /// Opaque provider input parameters
    #[serde(default)]
    pub params: serde_json::Value,
    /// Owning user, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Notification feed entry tracking this request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_id: Option<String>,
    /// When the request was created
    pub created_at: DateTime<Utc>,
}

impl VideoRequest {
    /// Create a request with a freshly generated ID.
    pub fn new(provider: impl Into<String>, params: serde_json::Value) -> Self {
        Self::with_id(RequestId::new(), provider, params)
    }

    /// Create a request with a caller-supplied ID.
    pub fn with_id(id: RequestId, provider: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            id,
            provider: provider.into(),
            params,
            user_id: None,
            notification_id: None,
            created_at: Utc::now(),
        }
    }

    /// Set the owning user.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set the notification ID.
    pub fn with_notification(mut self, notification_id: impl Into<String>) -> Self {
        self.notification_id = Some(notification_id.into());
        self
    }

    /// The prompt text, if the parameters carry one.
    pub fn prompt(&self) -> Option<&str> {
        prompt_from_params(&self.params)
    }

    /// Generate idempotency key for queue deduplication.
    pub fn idempotency_key(&self) -> String {
        format!("submit:{}", self.id)
    }
}

/// Read the `prompt` string out of an opaque parameter map.
pub fn prompt_from_params(params: &serde_json::Value) -> Option<&str> {
    params.get("prompt").and_then(|v| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_creation() {
        let req = VideoRequest::with_id(
            RequestId::from("r1"),
            "demo/model",
            json!({"prompt": "a cat surfing"}),
        )
        .with_user("user-1");

        assert_eq!(req.id.as_str(), "r1");
        assert_eq!(req.prompt(), Some("a cat surfing"));
        assert_eq!(req.user_id.as_deref(), Some("user-1"));
        assert_eq!(req.idempotency_key(), "submit:r1");
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = VideoRequest::new("demo/model", json!({}));
        let b = VideoRequest::new("demo/model", json!({}));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_request_deserializes_without_optional_fields() {
        let req: VideoRequest = serde_json::from_value(json!({
            "id": "r2",
            "provider": "demo/model",
            "created_at": "2024-01-01T00:00:00Z"
        }))
        .unwrap();

        assert!(req.params.is_null());
        assert!(req.user_id.is_none());
        assert!(req.prompt().is_none());
    }
}
