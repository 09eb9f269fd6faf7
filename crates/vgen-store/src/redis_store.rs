//! Redis implementation of the job store.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{debug, info};

use vgen_models::{CachedResult, RequestId, VideoStatus};

use crate::error::{StoreError, StoreResult};
use crate::store::{JobStore, DEFAULT_RESULT_TTL};

/// Redis store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Redis URL
    pub redis_url: String,
    /// Prefix for every key written by the store
    pub key_prefix: String,
    /// Expiration for cached results
    pub result_ttl: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "vgen".to_string(),
            result_ttl: DEFAULT_RESULT_TTL,
        }
    }
}

impl StoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: std::env::var("STORE_KEY_PREFIX").unwrap_or_else(|_| "vgen".to_string()),
            result_ttl: Duration::from_secs(
                std::env::var("RESULT_CACHE_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_RESULT_TTL.as_secs()),
            ),
        }
    }
}

/// Job store backed by plain Redis keys.
///
/// Key layout:
/// - `{prefix}:status:{request_id}` serialized status, no expiration
/// - `{prefix}:provider:{provider_request_id}` internal request ID, no expiration
/// - `{prefix}:result:{request_id}` serialized cached result, expires after `result_ttl`
#[derive(Clone)]
pub struct RedisJobStore {
    conn: MultiplexedConnection,
    config: StoreConfig,
}

impl RedisJobStore {
    /// Open the store connection.
    pub async fn connect(config: StoreConfig) -> StoreResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::connection_failed(e.to_string()))?;

        info!("Connected job store (prefix '{}')", config.key_prefix);
        Ok(Self { conn, config })
    }

    /// Open the store using environment configuration.
    pub async fn from_env() -> StoreResult<Self> {
        Self::connect(StoreConfig::from_env()).await
    }

    fn status_key(&self, id: &RequestId) -> String {
        format!("{}:status:{}", self.config.key_prefix, id)
    }

    fn mapping_key(&self, provider_request_id: &str) -> String {
        format!("{}:provider:{}", self.config.key_prefix, provider_request_id)
    }

    fn result_key(&self, id: &RequestId) -> String {
        format!("{}:result:{}", self.config.key_prefix, id)
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn put_status(&self, status: &VideoStatus) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(status)?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .set(self.status_key(&status.request_id), payload)
            .ignore();
        if let Some(provider_request_id) = &status.provider_request_id {
            pipe.set(
                self.mapping_key(provider_request_id),
                status.request_id.as_str(),
            )
            .ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;

        debug!(
            request_id = %status.request_id,
            status = %status.status,
            "Stored video status"
        );
        Ok(())
    }

    async fn get_status(&self, id: &RequestId) -> StoreResult<Option<VideoStatus>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.status_key(id)).await?;
        raw.map(|s| serde_json::from_str(&s).map_err(StoreError::from))
            .transpose()
    }

    async fn resolve_internal_id(&self, provider_request_id: &str) -> StoreResult<Option<RequestId>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.mapping_key(provider_request_id)).await?;
        Ok(raw.map(RequestId::from_string))
    }

    async fn put_cached_result(&self, id: &RequestId, result: &CachedResult) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(result)?;
        conn.set_ex::<_, _, ()>(self.result_key(id), payload, self.config.result_ttl.as_secs())
            .await?;
        Ok(())
    }

    async fn get_cached_result(&self, id: &RequestId) -> StoreResult<Option<CachedResult>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.result_key(id)).await?;
        raw.map(|s| serde_json::from_str(&s).map_err(StoreError::from))
            .transpose()
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vgen_models::VideoState;

    fn test_config() -> StoreConfig {
        StoreConfig {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: format!("vgen-test-{}", RequestId::new()),
            result_ttl: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.key_prefix, "vgen");
        assert_eq!(config.result_ttl, Duration::from_secs(86_400));
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_status_roundtrip_and_mapping() {
        let store = RedisJobStore::connect(test_config()).await.unwrap();
        let id = RequestId::from("r1");

        store
            .put_status(&VideoStatus::processing(id.clone()).with_provider_request_id(Some("p1".into())))
            .await
            .unwrap();

        let status = store.get_status(&id).await.unwrap().unwrap();
        assert_eq!(status.status, VideoState::Processing);
        assert_eq!(store.resolve_internal_id("p1").await.unwrap(), Some(id));
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_cached_result_has_ttl() {
        let config = test_config();
        let store = RedisJobStore::connect(config.clone()).await.unwrap();
        let id = RequestId::from("r2");
        let status = VideoStatus::failed(id.clone(), "boom");

        store
            .put_cached_result(&id, &CachedResult::from(&status))
            .await
            .unwrap();

        let mut conn = store.conn.clone();
        let ttl: i64 = conn.ttl(store.result_key(&id)).await.unwrap();
        assert!(ttl > 0 && ttl <= 60);

        let status_ttl: i64 = conn.ttl(store.status_key(&id)).await.unwrap();
        // -2: key does not exist, status was never written
        assert_eq!(status_ttl, -2);
    }
}
