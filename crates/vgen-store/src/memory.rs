//! In-process job store for local runs and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use vgen_models::{CachedResult, RequestId, VideoStatus};

use crate::error::{StoreError, StoreResult};
use crate::store::{JobStore, DEFAULT_RESULT_TTL};

#[derive(Default)]
struct Inner {
    statuses: HashMap<RequestId, VideoStatus>,
    mappings: HashMap<String, RequestId>,
    results: HashMap<RequestId, (CachedResult, Instant)>,
    writes: HashMap<RequestId, Vec<VideoStatus>>,
}

/// Job store held in process memory.
///
/// Result expiry is measured with `tokio::time::Instant`, so it follows a
/// paused test clock.
pub struct MemoryJobStore {
    inner: RwLock<Inner>,
    result_ttl: Duration,
    unavailable: AtomicBool,
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_RESULT_TTL)
    }

    pub fn with_ttl(result_ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            result_ttl,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every subsequent operation fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Every status written for a request, oldest first.
    pub async fn status_writes(&self, id: &RequestId) -> Vec<VideoStatus> {
        self.inner
            .read()
            .await
            .writes
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("memory store marked unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn put_status(&self, status: &VideoStatus) -> StoreResult<()> {
        self.check_available()?;
        let mut inner = self.inner.write().await;

        if let Some(provider_request_id) = &status.provider_request_id {
            inner
                .mappings
                .insert(provider_request_id.clone(), status.request_id.clone());
        }
        inner
            .writes
            .entry(status.request_id.clone())
            .or_default()
            .push(status.clone());
        inner
            .statuses
            .insert(status.request_id.clone(), status.clone());
        Ok(())
    }

    async fn get_status(&self, id: &RequestId) -> StoreResult<Option<VideoStatus>> {
        self.check_available()?;
        Ok(self.inner.read().await.statuses.get(id).cloned())
    }

    async fn resolve_internal_id(&self, provider_request_id: &str) -> StoreResult<Option<RequestId>> {
        self.check_available()?;
        Ok(self.inner.read().await.mappings.get(provider_request_id).cloned())
    }

    async fn put_cached_result(&self, id: &RequestId, result: &CachedResult) -> StoreResult<()> {
        self.check_available()?;
        let expires_at = Instant::now() + self.result_ttl;
        self.inner
            .write()
            .await
            .results
            .insert(id.clone(), (result.clone(), expires_at));
        Ok(())
    }

    async fn get_cached_result(&self, id: &RequestId) -> StoreResult<Option<CachedResult>> {
        self.check_available()?;
        let mut inner = self.inner.write().await;

        let expired = match inner.results.get(id) {
            Some((_, expires_at)) => Instant::now() >= *expires_at,
            None => return Ok(None),
        };
        if expired {
            inner.results.remove(id);
            return Ok(None);
        }
        Ok(inner.results.get(id).map(|(result, _)| result.clone()))
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check_available()
    }
}
