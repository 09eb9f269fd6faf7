//! Durable storage of generated videos.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{read_json, ServiceError, ServiceResult};

const SERVICE: &str = "persistence";

/// Header carrying the shared service token.
pub const SERVICE_TOKEN_HEADER: &str = "x-service-token";

/// Request to copy a generated video into durable storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveVideoRequest {
    pub prompt: String,
    /// Full provider endpoint the video came from
    pub endpoint: String,
    pub model: String,
    pub video_name: String,
    pub video_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Stored video record returned by the persistence service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedVideo {
    pub id: String,
    pub name: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

/// Asset persistence collaborator.
#[async_trait]
pub trait AssetPersistence: Send + Sync {
    async fn save_video_from_url(&self, request: &SaveVideoRequest) -> ServiceResult<SavedVideo>;
}

#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    pub base_url: String,
    pub service_token: String,
    pub timeout: Duration,
}

impl PersistenceConfig {
    pub fn new(base_url: impl Into<String>, service_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            service_token: service_token.into(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Load from environment. `None` when persistence is not configured.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("PERSISTENCE_BASE_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())?;
        let service_token = std::env::var("PERSISTENCE_SERVICE_TOKEN").unwrap_or_default();
        Some(Self::new(base_url, service_token))
    }
}

/// HTTP client for the persistence service.
#[derive(Clone)]
pub struct HttpAssetPersistence {
    http: Client,
    config: PersistenceConfig,
}

impl HttpAssetPersistence {
    pub fn new(config: PersistenceConfig) -> ServiceResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ServiceError::Network)?;
        Ok(Self { http, config })
    }
}

#[async_trait]
impl AssetPersistence for HttpAssetPersistence {
    async fn save_video_from_url(&self, request: &SaveVideoRequest) -> ServiceResult<SavedVideo> {
        let url = format!(
            "{}/api/videos/save-from-url",
            self.config.base_url.trim_end_matches('/')
        );
        debug!("Saving generated video via {}", url);

        let response = self
            .http
            .post(&url)
            .header(SERVICE_TOKEN_HEADER, &self.config.service_token)
            .json(request)
            .send()
            .await?;

        let saved: SavedVideo = read_json(SERVICE, response).await?;
        info!(video_id = %saved.id, "Saved generated video");
        Ok(saved)
    }
}
