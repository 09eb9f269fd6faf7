//! Job store abstraction.

use std::time::Duration;

use async_trait::async_trait;
use vgen_models::{CachedResult, RequestId, VideoStatus};

use crate::error::StoreResult;

/// Default retention for cached results (24 hours).
pub const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Durable record keeper for job status, provider mappings and result caches.
///
/// Writes are atomic per key only. There is no cross-key transaction and no
/// versioning: concurrent writers to the same request ID race and the last
/// write wins. Errors propagate to the caller; implementations never retry.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Upsert a status record. Also writes the provider mapping when the
    /// status carries a provider request ID.
    async fn put_status(&self, status: &VideoStatus) -> StoreResult<()>;

    /// Current status for a request, if any.
    async fn get_status(&self, id: &RequestId) -> StoreResult<Option<VideoStatus>>;

    /// Look up the internal request ID for a provider request ID.
    async fn resolve_internal_id(&self, provider_request_id: &str) -> StoreResult<Option<RequestId>>;

    /// Write a cached result that expires after the configured TTL.
    async fn put_cached_result(&self, id: &RequestId, result: &CachedResult) -> StoreResult<()>;

    /// Cached result for a request, if present and not expired.
    async fn get_cached_result(&self, id: &RequestId) -> StoreResult<Option<CachedResult>>;

    /// Check store connectivity.
    async fn ping(&self) -> StoreResult<()>;
}
