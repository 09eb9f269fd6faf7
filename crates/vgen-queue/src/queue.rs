//! Submission queue using Redis Streams.

use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use vgen_models::{SubmissionRecord, VideoRequest};

use crate::error::{QueueError, QueueResult};
use crate::job::{QueueJob, SubmitVideoJob};

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for jobs
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter queue stream name
    pub dlq_stream_name: String,
    /// List holding recent submission outcomes
    pub history_key: String,
    /// Number of submission outcomes kept in the history
    pub history_limit: usize,
    /// How long an idempotency key blocks re-enqueueing the same request
    pub dedup_ttl: Duration,
    /// Submission attempts per message before it moves to the DLQ
    pub max_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "vgen:jobs".to_string(),
            consumer_group: "vgen:workers".to_string(),
            dlq_stream_name: "vgen:dlq".to_string(),
            history_key: "vgen:submit:history".to_string(),
            history_limit: 100,
            dedup_ttl: Duration::from_secs(3600),
            max_attempts: 3,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM").unwrap_or(defaults.dlq_stream_name),
            history_key: std::env::var("QUEUE_HISTORY_KEY").unwrap_or(defaults.history_key),
            history_limit: std::env::var("QUEUE_HISTORY_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.history_limit),
            dedup_ttl: defaults.dedup_ttl,
            max_attempts: std::env::var("SUBMIT_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_attempts),
        }
    }
}

/// Job queue client.
///
/// Holds one shared multiplexed connection for regular commands. Blocking
/// stream reads use their own connection so they never stall other callers.
pub struct JobQueue {
    client: redis::Client,
    conn: MultiplexedConnection,
    config: QueueConfig,
}

impl JobQueue {
    /// Open the queue connection.
    pub async fn connect(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;
        Ok(Self {
            client,
            conn,
            config,
        })
    }

    /// Open the queue using environment configuration.
    pub async fn from_env() -> QueueResult<Self> {
        Self::connect(QueueConfig::from_env()).await
    }

    /// Initialize the queue (create consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.conn.clone();

        // Create consumer group (ignore error if already exists)
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Enqueue a submission for a generation request.
    pub async fn enqueue_submission(&self, request: VideoRequest) -> QueueResult<String> {
        self.enqueue(QueueJob::SubmitVideo(SubmitVideoJob::new(request)))
            .await
    }

    /// Enqueue a job.
    async fn enqueue(&self, job: QueueJob) -> QueueResult<String> {
        let mut conn = self.conn.clone();

        let payload = serde_json::to_string(&job)?;
        let idempotency_key = job.idempotency_key();

        // SET NX doubles as the duplicate check
        let dedup_key = Self::dedup_key(&idempotency_key);
        let fresh: bool = redis::cmd("SET")
            .arg(&dedup_key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(self.config.dedup_ttl.as_secs())
            .query_async::<Option<String>>(&mut conn)
            .await?
            .is_some();
        if !fresh {
            warn!("Duplicate job rejected: {}", idempotency_key);
            return Err(QueueError::Duplicate(idempotency_key));
        }

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("key")
            .arg(&idempotency_key)
            .query_async(&mut conn)
            .await?;

        info!(
            "Enqueued job {} with message ID {}",
            job.request_id(),
            message_id
        );

        Ok(message_id)
    }

    fn dedup_key(idempotency_key: &str) -> String {
        format!("vgen:dedup:{}", idempotency_key)
    }

    /// Remove the idempotency key so the same request can be enqueued again.
    pub async fn clear_dedup(&self, job: &QueueJob) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(Self::dedup_key(&job.idempotency_key()))
            .await?;
        Ok(())
    }

    /// Acknowledge a job (mark as completed).
    pub async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.conn.clone();

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        // Delete the message from the stream
        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged job: {}", message_id);
        Ok(())
    }

    /// Move a job to the dead letter queue.
    pub async fn dlq(&self, message_id: &str, job: &QueueJob, error: &str) -> QueueResult<()> {
        let mut conn = self.conn.clone();

        let payload = serde_json::to_string(job)?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        self.ack(message_id).await?;

        warn!("Moved job {} to DLQ: {}", job.request_id(), error);
        Ok(())
    }

    /// Get queue length.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.conn.clone();
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    /// Get DLQ length.
    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.conn.clone();
        let len: u64 = conn.xlen(&self.config.dlq_stream_name).await?;
        Ok(len)
    }

    /// Consume jobs from the queue.
    /// Returns (message_id, job) pairs.
    pub async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, QueueJob)>> {
        // Dedicated connection: XREADGROUP BLOCK would hold up the shared one
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: Option<redis::streams::StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">") // Only new messages
            .query_async(&mut conn)
            .await?;

        let mut jobs = Vec::new();

        for stream_key in result.map(|r| r.keys).unwrap_or_default() {
            for entry in stream_key.ids {
                if let Some(job) = self.parse_entry(&entry.id, &entry.map).await {
                    debug!("Consumed job {} from stream", job.request_id());
                    jobs.push((entry.id.clone(), job));
                }
            }
        }

        Ok(jobs)
    }

    /// Claim pending jobs that have been idle for too long.
    /// This handles jobs from crashed workers (stalled deliveries).
    pub async fn claim_pending(
        &self,
        consumer_name: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, QueueJob)>> {
        let mut conn = self.conn.clone();

        let pending: redis::streams::StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(min_idle_ms);
        for entry in &pending.ids {
            cmd.arg(&entry.id);
        }
        let result: redis::streams::StreamClaimReply = cmd.query_async(&mut conn).await?;

        let mut jobs = Vec::new();

        for entry in result.ids {
            if let Some(job) = self.parse_entry(&entry.id, &entry.map).await {
                info!("Claimed stalled job {} from stream", job.request_id());
                jobs.push((entry.id.clone(), job));
            }
        }

        Ok(jobs)
    }

    /// Decode a stream entry, acknowledging malformed payloads so they are
    /// not delivered again.
    async fn parse_entry(
        &self,
        message_id: &str,
        map: &std::collections::HashMap<String, redis::Value>,
    ) -> Option<QueueJob> {
        let Some(redis::Value::BulkString(payload)) = map.get("job") else {
            return None;
        };
        let payload_str = String::from_utf8_lossy(payload);
        match serde_json::from_str::<QueueJob>(&payload_str) {
            Ok(job) => Some(job),
            Err(e) => {
                warn!("Failed to parse job payload {}: {}", message_id, e);
                self.ack(message_id).await.ok();
                None
            }
        }
    }

    /// Append a submission outcome to the bounded history.
    pub async fn record_submission(&self, record: &SubmissionRecord) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(record)?;
        let last_index = self.config.history_limit.saturating_sub(1) as isize;

        redis::pipe()
            .atomic()
            .lpush(&self.config.history_key, payload)
            .ignore()
            .ltrim(&self.config.history_key, 0, last_index)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Most recent submission outcomes, newest first.
    pub async fn recent_submissions(&self, limit: usize) -> QueueResult<Vec<SubmissionRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn
            .lrange(&self.config.history_key, 0, limit as isize - 1)
            .await?;
        raw.iter()
            .map(|s| serde_json::from_str(s).map_err(QueueError::from))
            .collect()
    }

    /// Number of entries in the submission history.
    pub async fn history_len(&self) -> QueueResult<u64> {
        let mut conn = self.conn.clone();
        let len: u64 = conn.llen(&self.config.history_key).await?;
        Ok(len)
    }

    /// Count one submission attempt for a message.
    ///
    /// The counter survives redelivery, so a message reclaimed from a dead
    /// worker resumes where it left off.
    pub async fn increment_retry(&self, message_id: &str) -> QueueResult<u32> {
        let mut conn = self.conn.clone();

        let key = format!("vgen:retry:{}", message_id);
        let count: u32 = conn.incr(&key, 1).await?;
        // Set TTL to 24 hours
        conn.expire::<_, ()>(&key, 86400).await?;
        Ok(count)
    }

    /// Drop the attempt counter once a message is settled.
    pub async fn clear_retry(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(format!("vgen:retry:{}", message_id))
            .await?;
        Ok(())
    }

    /// Get max attempts from config.
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Check queue connectivity.
    pub async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }
}
