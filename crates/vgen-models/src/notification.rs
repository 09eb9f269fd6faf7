//! Notification feed payloads.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::status::VideoState;

/// Status values understood by the notification feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl From<VideoState> for NotificationStatus {
    fn from(state: VideoState) -> Self {
        match state {
            VideoState::Pending => NotificationStatus::Pending,
            VideoState::Processing => NotificationStatus::Processing,
            VideoState::Completed => NotificationStatus::Completed,
            VideoState::Failed => NotificationStatus::Failed,
        }
    }
}

/// Body for creating a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateNotification {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

/// Body for updating a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NotificationUpdate {
    pub status: NotificationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

impl NotificationUpdate {
    pub fn completed(thumbnail_url: impl Into<String>) -> Self {
        Self {
            status: NotificationStatus::Completed,
            error_message: None,
            thumbnail_url: Some(thumbnail_url.into()),
        }
    }

    pub fn failed(error_message: impl Into<String>) -> Self {
        Self {
            status: NotificationStatus::Failed,
            error_message: Some(error_message.into()),
            thumbnail_url: None,
        }
    }
}
