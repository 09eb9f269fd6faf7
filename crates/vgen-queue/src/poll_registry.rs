//! Index of active poll jobs scanned by the global ticker.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use vgen_models::{PollJob, RequestId};

use crate::error::{QueueError, QueueResult};

/// Registry of recurring poll jobs.
///
/// A job is handed out by [`PollRegistry::claim_due`] until it is
/// deregistered. A claim bumps `poll_count` by one and leases the entry: it is
/// not handed out again until the iteration calls [`PollRegistry::release`],
/// which makes it due one interval later. An entry whose worker died
/// mid-iteration comes due again when the lease runs out.
#[async_trait]
pub trait PollRegistry: Send + Sync {
    /// Register a job. The first invocation is due one interval from now.
    async fn register(&self, job: &PollJob, interval: Duration) -> QueueResult<()>;

    /// Claim up to `limit` due jobs, leasing each until it is released.
    async fn claim_due(&self, limit: usize) -> QueueResult<Vec<PollJob>>;

    /// Hand a claimed job back; its next invocation is due one interval from
    /// now. No-op for a job that has been deregistered.
    async fn release(&self, id: &RequestId) -> QueueResult<()>;

    /// Extend the transient error streak and return its new length.
    ///
    /// Fails for a job that is not registered.
    async fn record_transient_error(&self, id: &RequestId) -> QueueResult<u32>;

    /// Clear the transient error streak. No-op for unregistered jobs.
    async fn reset_errors(&self, id: &RequestId) -> QueueResult<()>;

    /// Remove a job. Returns true only for the call that actually removed it.
    async fn deregister(&self, id: &RequestId) -> QueueResult<bool>;

    /// Look up a registered job with its current counters.
    async fn get(&self, id: &RequestId) -> QueueResult<Option<PollJob>>;

    /// Number of registered jobs.
    async fn active_count(&self) -> QueueResult<u64>;
}

/// Default time a claimed entry stays hidden from other claims.
pub const DEFAULT_CLAIM_LEASE: Duration = Duration::from_secs(300);

/// Atomically pops due entries and leases them.
///
/// KEYS: due zset, jobs hash, counts hash, errors hash, intervals hash
/// ARGV: now ms, limit, lease ms
///
/// Returns a flat list of `[payload, poll_count, consecutive_errors]` triples.
const CLAIM_DUE_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[2]))
local out = {}
for _, id in ipairs(ids) do
  local raw = redis.call('HGET', KEYS[2], id)
  if raw then
    local count = redis.call('HINCRBY', KEYS[3], id, 1)
    local errors = redis.call('HGET', KEYS[4], id) or '0'
    redis.call('ZADD', KEYS[1], tonumber(ARGV[1]) + tonumber(ARGV[3]), id)
    table.insert(out, raw)
    table.insert(out, tostring(count))
    table.insert(out, errors)
  else
    redis.call('ZREM', KEYS[1], id)
    redis.call('HDEL', KEYS[3], id)
    redis.call('HDEL', KEYS[4], id)
    redis.call('HDEL', KEYS[5], id)
  end
end
return out
"#;

/// Reschedules a leased entry one interval ahead, unless it was removed.
///
/// KEYS: due zset, intervals hash
/// ARGV: id, now ms, fallback interval ms
const RELEASE_SCRIPT: &str = r#"
if redis.call('ZSCORE', KEYS[1], ARGV[1]) == false then
  return 0
end
local interval = redis.call('HGET', KEYS[2], ARGV[1]) or ARGV[3]
redis.call('ZADD', KEYS[1], 'XX', tonumber(ARGV[2]) + tonumber(interval), ARGV[1])
return 1
"#;

/// Bumps the error streak of a registered entry; -1 when it is gone.
///
/// KEYS: jobs hash, errors hash
/// ARGV: id
const RECORD_ERROR_SCRIPT: &str = r#"
if redis.call('HEXISTS', KEYS[1], ARGV[1]) == 0 then
  return -1
end
return redis.call('HINCRBY', KEYS[2], ARGV[1], 1)
"#;

/// Zeroes the error streak of a registered entry.
///
/// KEYS: jobs hash, errors hash
/// ARGV: id
const RESET_ERRORS_SCRIPT: &str = r#"
if redis.call('HEXISTS', KEYS[1], ARGV[1]) == 0 then
  return 0
end
redis.call('HSET', KEYS[2], ARGV[1], 0)
return 1
"#;

/// Poll registry configuration.
#[derive(Debug, Clone)]
pub struct PollRegistryConfig {
    pub redis_url: String,
    pub key_prefix: String,
    /// Interval used for entries registered without one
    pub default_interval: Duration,
    /// How long a claimed entry stays hidden before it counts as stalled
    pub claim_lease: Duration,
}

impl Default for PollRegistryConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "vgen:poll".to_string(),
            default_interval: Duration::from_secs(10),
            claim_lease: DEFAULT_CLAIM_LEASE,
        }
    }
}

impl PollRegistryConfig {
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: std::env::var("POLL_KEY_PREFIX")
                .unwrap_or_else(|_| "vgen:poll".to_string()),
            default_interval: Duration::from_secs(
                std::env::var("POLL_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
            ),
            claim_lease: std::env::var("POLL_CLAIM_LEASE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_CLAIM_LEASE),
        }
    }
}

/// Redis-backed poll registry shared by all worker processes.
///
/// Key layout under `{prefix}`:
/// - `:due` sorted set, score = next due time in ms
/// - `:jobs` hash of serialized jobs
/// - `:counts` hash of invocation counters
/// - `:errors` hash of transient error streaks
/// - `:intervals` hash of repeat intervals in ms
#[derive(Clone)]
pub struct RedisPollRegistry {
    conn: MultiplexedConnection,
    config: PollRegistryConfig,
    claim_script: redis::Script,
    release_script: redis::Script,
    record_error_script: redis::Script,
    reset_errors_script: redis::Script,
}

impl RedisPollRegistry {
    pub async fn connect(config: PollRegistryConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;

        info!("Connected poll registry (prefix '{}')", config.key_prefix);
        Ok(Self {
            conn,
            config,
            claim_script: redis::Script::new(CLAIM_DUE_SCRIPT),
            release_script: redis::Script::new(RELEASE_SCRIPT),
            record_error_script: redis::Script::new(RECORD_ERROR_SCRIPT),
            reset_errors_script: redis::Script::new(RESET_ERRORS_SCRIPT),
        })
    }

    pub async fn from_env() -> QueueResult<Self> {
        Self::connect(PollRegistryConfig::from_env()).await
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.config.key_prefix, suffix)
    }

    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }
}

fn not_registered(id: &RequestId) -> QueueError {
    QueueError::registry(format!("poll job {} not registered", id))
}

fn decode_claimed(values: Vec<String>) -> QueueResult<Vec<PollJob>> {
    if values.len() % 3 != 0 {
        return Err(QueueError::registry(format!(
            "claim script returned {} values",
            values.len()
        )));
    }

    let mut jobs = Vec::with_capacity(values.len() / 3);
    for chunk in values.chunks(3) {
        let mut job: PollJob = match serde_json::from_str(&chunk[0]) {
            Ok(job) => job,
            Err(e) => {
                warn!("Skipping unreadable poll job payload: {}", e);
                continue;
            }
        };
        job.poll_count = chunk[1].parse().unwrap_or(job.poll_count);
        job.consecutive_errors = chunk[2].parse().unwrap_or(0);
        jobs.push(job);
    }
    Ok(jobs)
}

#[async_trait]
impl PollRegistry for RedisPollRegistry {
    async fn register(&self, job: &PollJob, interval: Duration) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let id = job.request_id.as_str();
        let payload = serde_json::to_string(job)?;
        let interval_ms = interval.as_millis() as u64;

        redis::pipe()
            .atomic()
            .hset(self.key("jobs"), id, payload)
            .ignore()
            .hset(self.key("counts"), id, job.poll_count)
            .ignore()
            .hset(self.key("errors"), id, job.consecutive_errors)
            .ignore()
            .hset(self.key("intervals"), id, interval_ms)
            .ignore()
            .zadd(self.key("due"), id, Self::now_ms() + interval_ms)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        debug!(request_id = %job.request_id, interval_ms, "Registered poll job");
        Ok(())
    }

    async fn claim_due(&self, limit: usize) -> QueueResult<Vec<PollJob>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();

        let values: Vec<String> = self
            .claim_script
            .key(self.key("due"))
            .key(self.key("jobs"))
            .key(self.key("counts"))
            .key(self.key("errors"))
            .key(self.key("intervals"))
            .arg(Self::now_ms())
            .arg(limit)
            .arg(self.config.claim_lease.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;

        decode_claimed(values)
    }

    async fn release(&self, id: &RequestId) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let released: i64 = self
            .release_script
            .key(self.key("due"))
            .key(self.key("intervals"))
            .arg(id.as_str())
            .arg(Self::now_ms())
            .arg(self.config.default_interval.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;

        if released == 0 {
            debug!(request_id = %id, "Released poll job was already removed");
        }
        Ok(())
    }

    async fn record_transient_error(&self, id: &RequestId) -> QueueResult<u32> {
        let mut conn = self.conn.clone();
        let streak: i64 = self
            .record_error_script
            .key(self.key("jobs"))
            .key(self.key("errors"))
            .arg(id.as_str())
            .invoke_async(&mut conn)
            .await?;

        if streak < 0 {
            return Err(not_registered(id));
        }
        Ok(streak as u32)
    }

    async fn reset_errors(&self, id: &RequestId) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .reset_errors_script
            .key(self.key("jobs"))
            .key(self.key("errors"))
            .arg(id.as_str())
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn deregister(&self, id: &RequestId) -> QueueResult<bool> {
        let mut conn = self.conn.clone();
        let id = id.as_str();

        let (removed,): (u32,) = redis::pipe()
            .atomic()
            .hdel(self.key("jobs"), id)
            .zrem(self.key("due"), id)
            .ignore()
            .hdel(self.key("counts"), id)
            .ignore()
            .hdel(self.key("errors"), id)
            .ignore()
            .hdel(self.key("intervals"), id)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(removed > 0)
    }

    async fn get(&self, id: &RequestId) -> QueueResult<Option<PollJob>> {
        let mut conn = self.conn.clone();
        let id = id.as_str();

        let (raw, count, errors): (Option<String>, Option<u32>, Option<u32>) = redis::pipe()
            .hget(self.key("jobs"), id)
            .hget(self.key("counts"), id)
            .hget(self.key("errors"), id)
            .query_async(&mut conn)
            .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        let mut job: PollJob = serde_json::from_str(&raw)?;
        job.poll_count = count.unwrap_or(job.poll_count);
        job.consecutive_errors = errors.unwrap_or(0);
        Ok(Some(job))
    }

    async fn active_count(&self) -> QueueResult<u64> {
        let mut conn = self.conn.clone();
        let count: u64 = conn.hlen(self.key("jobs")).await?;
        Ok(count)
    }
}

struct Entry {
    job: PollJob,
    interval: Duration,
    next_due: Instant,
}

/// In-process poll registry.
///
/// Due times follow `tokio::time`, so a paused test clock drives it.
pub struct MemoryPollRegistry {
    entries: Mutex<HashMap<RequestId, Entry>>,
    deregistered: Mutex<Vec<RequestId>>,
    lease: Duration,
}

impl Default for MemoryPollRegistry {
    fn default() -> Self {
        Self::with_lease(DEFAULT_CLAIM_LEASE)
    }
}

impl MemoryPollRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lease(lease: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            deregistered: Mutex::new(Vec::new()),
            lease,
        }
    }

    /// Every successful deregistration, in order.
    pub async fn deregistrations(&self) -> Vec<RequestId> {
        self.deregistered.lock().await.clone()
    }
}

#[async_trait]
impl PollRegistry for MemoryPollRegistry {
    async fn register(&self, job: &PollJob, interval: Duration) -> QueueResult<()> {
        self.entries.lock().await.insert(
            job.request_id.clone(),
            Entry {
                job: job.clone(),
                interval,
                next_due: Instant::now() + interval,
            },
        );
        Ok(())
    }

    async fn claim_due(&self, limit: usize) -> QueueResult<Vec<PollJob>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        let mut due: Vec<&mut Entry> = entries
            .values_mut()
            .filter(|entry| entry.next_due <= now)
            .collect();
        due.sort_by_key(|entry| entry.next_due);

        Ok(due
            .into_iter()
            .take(limit)
            .map(|entry| {
                entry.job.poll_count += 1;
                entry.next_due = now + self.lease;
                entry.job.clone()
            })
            .collect())
    }

    async fn release(&self, id: &RequestId) -> QueueResult<()> {
        if let Some(entry) = self.entries.lock().await.get_mut(id) {
            entry.next_due = Instant::now() + entry.interval;
        }
        Ok(())
    }

    async fn record_transient_error(&self, id: &RequestId) -> QueueResult<u32> {
        let mut entries = self.entries.lock().await;
        match entries.get_mut(id) {
            Some(entry) => {
                entry.job.consecutive_errors += 1;
                Ok(entry.job.consecutive_errors)
            }
            None => Err(not_registered(id)),
        }
    }

    async fn reset_errors(&self, id: &RequestId) -> QueueResult<()> {
        if let Some(entry) = self.entries.lock().await.get_mut(id) {
            entry.job.consecutive_errors = 0;
        }
        Ok(())
    }

    async fn deregister(&self, id: &RequestId) -> QueueResult<bool> {
        let removed = self.entries.lock().await.remove(id).is_some();
        if removed {
            self.deregistered.lock().await.push(id.clone());
        }
        Ok(removed)
    }

    async fn get(&self, id: &RequestId) -> QueueResult<Option<PollJob>> {
        Ok(self
            .entries
            .lock()
            .await
            .get(id)
            .map(|entry| entry.job.clone()))
    }

    async fn active_count(&self) -> QueueResult<u64> {
        Ok(self.entries.lock().await.len() as u64)
    }
}
