//! Provider HTTP client.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info_span, warn, Instrument};

use crate::error::{ProviderError, ProviderResult};
use crate::metrics::record_request;
use crate::types::{StatusResponse, SubmitResponse};

/// Generative video provider operations.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Queue a generation and return the provider's request ID.
    async fn submit(&self, provider: &str, params: &Value) -> ProviderResult<SubmitResponse>;

    /// Check progress of a queued generation.
    async fn status(&self, provider: &str, request_id: &str) -> ProviderResult<StatusResponse>;

    /// Fetch the output of a completed generation.
    async fn result(&self, provider: &str, request_id: &str) -> ProviderResult<Value>;
}

/// Configuration for the provider client.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Base URL of the provider queue API
    pub base_url: String,
    /// API key sent as `Authorization: Key <key>`
    pub api_key: String,
    /// Request timeout
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
}

impl ProviderConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> ProviderResult<Self> {
        let api_key = std::env::var("PROVIDER_API_KEY")
            .map_err(|_| ProviderError::Config("PROVIDER_API_KEY must be set".to_string()))?;

        if api_key.trim().is_empty() {
            return Err(ProviderError::Config(
                "PROVIDER_API_KEY cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            base_url: std::env::var("PROVIDER_BASE_URL")
                .unwrap_or_else(|_| "https://queue.fal.run".to_string()),
            api_key,
            timeout: Duration::from_secs(
                std::env::var("PROVIDER_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            connect_timeout: Duration::from_secs(10),
        })
    }
}

/// App portion of a provider ID: its first two path segments.
///
/// `fal-ai/kling-video/v1/standard` addresses requests under `fal-ai/kling-video`.
pub fn app_id(provider: &str) -> &str {
    let trimmed = provider.trim_matches('/');
    match trimmed.match_indices('/').nth(1) {
        Some((idx, _)) => &trimmed[..idx],
        None => trimmed,
    }
}

/// HTTP client for the provider's queue API.
#[derive(Clone)]
pub struct HttpProviderClient {
    http: Client,
    config: ProviderConfig,
}

impl HttpProviderClient {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("vgen-provider/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ProviderError::Network)?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> ProviderResult<Self> {
        Self::new(ProviderConfig::from_env()?)
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn request_url(&self, provider: &str, request_id: &str) -> String {
        format!(
            "{}/{}/requests/{}",
            self.base(),
            app_id(provider),
            urlencoding::encode(request_id)
        )
    }

    fn auth_header(&self) -> String {
        format!("Key {}", self.config.api_key)
    }

    async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> ProviderResult<T> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ProviderError::from_http_status(status.as_u16(), body));
        }

        serde_json::from_str(&body).map_err(|e| {
            ProviderError::unknown(format!("failed to decode provider response: {}", e))
        })
    }

    /// Run a provider call inside a span and record its metrics.
    async fn execute_request<T, F>(
        &self,
        operation: &str,
        provider: &str,
        request_id: Option<&str>,
        fut: F,
    ) -> ProviderResult<T>
    where
        F: std::future::Future<Output = ProviderResult<T>>,
    {
        let span = if let Some(id) = request_id {
            info_span!("provider_request", operation = %operation, provider = %provider, provider_request_id = %id)
        } else {
            info_span!("provider_request", operation = %operation, provider = %provider)
        };

        let start = Instant::now();
        let result = fut.instrument(span).await;
        let latency_ms = start.elapsed().as_millis() as f64;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => {
                warn!(operation, provider, kind = e.kind(), "Provider call failed: {}", e);
                e.kind()
            }
        };
        record_request(operation, outcome, latency_ms);

        result
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn submit(&self, provider: &str, params: &Value) -> ProviderResult<SubmitResponse> {
        let url = format!("{}/{}", self.base(), provider.trim_matches('/'));

        self.execute_request("submit", provider, None, async {
            debug!("Submitting generation to {}", url);
            let response = self
                .http
                .post(&url)
                .header(reqwest::header::AUTHORIZATION, self.auth_header())
                .json(params)
                .send()
                .await?;
            Self::read_json(response).await
        })
        .await
    }

    async fn status(&self, provider: &str, request_id: &str) -> ProviderResult<StatusResponse> {
        let url = format!("{}/status", self.request_url(provider, request_id));

        self.execute_request("status", provider, Some(request_id), async {
            let response = self
                .http
                .get(&url)
                .query(&[("logs", "1")])
                .header(reqwest::header::AUTHORIZATION, self.auth_header())
                .send()
                .await?;
            Self::read_json(response).await
        })
        .await
    }

    async fn result(&self, provider: &str, request_id: &str) -> ProviderResult<Value> {
        let url = self.request_url(provider, request_id);

        self.execute_request("result", provider, Some(request_id), async {
            let response = self
                .http
                .get(&url)
                .header(reqwest::header::AUTHORIZATION, self.auth_header())
                .send()
                .await?;
            Self::read_json(response).await
        })
        .await
    }
}
