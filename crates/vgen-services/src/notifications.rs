//! Notification feed client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use vgen_models::{CreateNotification, NotificationUpdate};

use crate::error::{read_json, ServiceError, ServiceResult};
use crate::persistence::SERVICE_TOKEN_HEADER;

const SERVICE: &str = "notifications";

/// Notification feed collaborator.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Create a feed entry and return its ID.
    async fn create(&self, notification: &CreateNotification) -> ServiceResult<String>;

    /// Update an existing feed entry.
    async fn update(&self, id: &str, update: &NotificationUpdate) -> ServiceResult<()>;
}

#[derive(Debug, Deserialize)]
struct CreatedNotification {
    id: String,
}

#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub base_url: String,
    pub service_token: String,
    pub timeout: Duration,
}

impl NotificationConfig {
    pub fn new(base_url: impl Into<String>, service_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            service_token: service_token.into(),
            timeout: Duration::from_secs(15),
        }
    }

    /// Load from environment. `None` when notifications are not configured.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("NOTIFICATION_BASE_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())?;
        let service_token = std::env::var("NOTIFICATION_SERVICE_TOKEN").unwrap_or_default();
        Some(Self::new(base_url, service_token))
    }
}

/// HTTP client for the notification feed.
#[derive(Clone)]
pub struct HttpNotifier {
    http: Client,
    config: NotificationConfig,
}

impl HttpNotifier {
    pub fn new(config: NotificationConfig) -> ServiceResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ServiceError::Network)?;
        Ok(Self { http, config })
    }

    fn collection_url(&self) -> String {
        format!(
            "{}/api/notifications",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn create(&self, notification: &CreateNotification) -> ServiceResult<String> {
        let response = self
            .http
            .post(self.collection_url())
            .header(SERVICE_TOKEN_HEADER, &self.config.service_token)
            .json(notification)
            .send()
            .await?;

        let created: CreatedNotification = read_json(SERVICE, response).await?;
        debug!(notification_id = %created.id, "Created notification");
        Ok(created.id)
    }

    async fn update(&self, id: &str, update: &NotificationUpdate) -> ServiceResult<()> {
        let url = format!("{}/{}", self.collection_url(), urlencoding::encode(id));

        let response = self
            .http
            .patch(&url)
            .header(SERVICE_TOKEN_HEADER, &self.config.service_token)
            .json(update)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::RequestFailed {
                service: SERVICE,
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        debug!(notification_id = %id, status = ?update.status, "Updated notification");
        Ok(())
    }
}
