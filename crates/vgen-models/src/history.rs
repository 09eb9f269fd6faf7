//! Submission attempt history entries.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::request::RequestId;

/// Outcome of one submission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionOutcome {
    Submitted,
    Failed,
}

/// One entry in the bounded submission history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SubmissionRecord {
    pub request_id: RequestId,
    pub outcome: SubmissionOutcome,
    /// 1-based attempt number
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl SubmissionRecord {
    pub fn submitted(request_id: RequestId, attempt: u32, provider_request_id: impl Into<String>) -> Self {
        Self {
            request_id,
            outcome: SubmissionOutcome::Submitted,
            attempt,
            provider_request_id: Some(provider_request_id.into()),
            error: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn failed(request_id: RequestId, attempt: u32, error: impl Into<String>) -> Self {
        Self {
            request_id,
            outcome: SubmissionOutcome::Failed,
            attempt,
            provider_request_id: None,
            error: Some(error.into()),
            recorded_at: Utc::now(),
        }
    }
}
