//! Redis-backed pipeline tests.
//!
//! Run with a local Redis: `cargo test -p vgen-worker -- --ignored`

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use vgen_models::{PollJob, RequestId, SubmissionRecord, VideoRequest, VideoState, VideoStatus};
use vgen_queue::{
    JobQueue, PollRegistry, PollRegistryConfig, QueueConfig, QueueError, RedisPollRegistry,
};
use vgen_store::{JobStore, RedisJobStore, StoreConfig};
use vgen_worker::QueueMonitor;

fn namespace() -> String {
    format!("vgen-test:{}", Uuid::new_v4())
}

async fn queue(ns: &str) -> JobQueue {
    dotenvy::dotenv().ok();
    let base = QueueConfig::from_env();
    let config = QueueConfig {
        stream_name: format!("{}:jobs", ns),
        consumer_group: format!("{}:workers", ns),
        dlq_stream_name: format!("{}:dlq", ns),
        history_key: format!("{}:history", ns),
        ..base
    };
    let queue = JobQueue::connect(config).await.expect("Failed to connect queue");
    queue.init().await.expect("Failed to initialize queue");
    queue
}

async fn registry(ns: &str) -> RedisPollRegistry {
    dotenvy::dotenv().ok();
    let config = PollRegistryConfig {
        key_prefix: format!("{}:poll", ns),
        ..PollRegistryConfig::from_env()
    };
    RedisPollRegistry::connect(config)
        .await
        .expect("Failed to connect poll registry")
}

async fn store(ns: &str) -> RedisJobStore {
    dotenvy::dotenv().ok();
    let config = StoreConfig {
        key_prefix: ns.to_string(),
        ..StoreConfig::from_env()
    };
    RedisJobStore::connect(config)
        .await
        .expect("Failed to connect store")
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_enqueue_consume_ack() {
    let ns = namespace();
    let queue = queue(&ns).await;

    let request = VideoRequest::new("demo/model", json!({"prompt": "waves"}));
    let request_id = request.id.clone();
    queue.enqueue_submission(request).await.expect("Failed to enqueue");
    assert_eq!(queue.len().await.unwrap(), 1);

    let jobs = queue.consume("test-consumer", 1000, 5).await.expect("Failed to consume");
    assert_eq!(jobs.len(), 1);
    let (message_id, job) = &jobs[0];
    assert_eq!(job.request_id(), &request_id);

    queue.ack(message_id).await.expect("Failed to ack");
    assert_eq!(queue.len().await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_duplicate_enqueue_rejected_until_cleared() {
    let ns = namespace();
    let queue = queue(&ns).await;

    let request = VideoRequest::new("demo/model", json!({}));
    queue.enqueue_submission(request.clone()).await.unwrap();

    let err = queue.enqueue_submission(request.clone()).await.unwrap_err();
    assert!(matches!(err, QueueError::Duplicate(_)));

    let jobs = queue.consume("test-consumer", 1000, 1).await.unwrap();
    let (message_id, job) = &jobs[0];
    queue.ack(message_id).await.unwrap();
    queue.clear_dedup(job).await.unwrap();

    assert!(queue.enqueue_submission(request).await.is_ok());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_dlq_moves_message() {
    let ns = namespace();
    let queue = queue(&ns).await;

    queue
        .enqueue_submission(VideoRequest::new("demo/model", json!({})))
        .await
        .unwrap();
    let jobs = queue.consume("test-consumer", 1000, 1).await.unwrap();
    let (message_id, job) = &jobs[0];

    queue.dlq(message_id, job, "provider rejected").await.unwrap();
    assert_eq!(queue.len().await.unwrap(), 0);
    assert_eq!(queue.dlq_len().await.unwrap(), 1);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_history_is_trimmed_to_limit() {
    let ns = namespace();
    let queue = queue(&ns).await;
    let limit = queue.config().history_limit;

    for attempt in 0..(limit as u32 + 5) {
        let record = SubmissionRecord::submitted(RequestId::new(), attempt + 1, "p1");
        queue.record_submission(&record).await.unwrap();
    }

    assert_eq!(queue.history_len().await.unwrap(), limit as u64);
    let recent = queue.recent_submissions(3).await.unwrap();
    assert_eq!(recent.len(), 3);
    assert_eq!(recent[0].attempt, limit as u32 + 5);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_delivery_counter() {
    let ns = namespace();
    let queue = queue(&ns).await;
    let message_id = format!("{}-0", Uuid::new_v4().as_u128() % 1_000_000);

    assert_eq!(queue.increment_retry(&message_id).await.unwrap(), 1);
    assert_eq!(queue.increment_retry(&message_id).await.unwrap(), 2);
    queue.clear_retry(&message_id).await.unwrap();
    assert_eq!(queue.increment_retry(&message_id).await.unwrap(), 1);
    queue.clear_retry(&message_id).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_registry_claims_due_jobs_once() {
    let ns = namespace();
    let registry = registry(&ns).await;

    let request = VideoRequest::new("demo/model", json!({"prompt": "waves"})).with_user("u1");
    let job = PollJob::for_request(&request, "p1");
    registry
        .register(&job, Duration::from_millis(200))
        .await
        .unwrap();

    assert!(registry.claim_due(10).await.unwrap().is_empty());

    tokio::time::sleep(Duration::from_millis(300)).await;
    let claimed = registry.claim_due(10).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].request_id, request.id);
    assert_eq!(claimed[0].poll_count, 1);
    assert_eq!(claimed[0].user_id.as_deref(), Some("u1"));

    // Leased until released, then due one interval later
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(registry.claim_due(10).await.unwrap().is_empty());
    registry.release(&request.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(registry.claim_due(10).await.unwrap()[0].poll_count, 2);

    assert_eq!(registry.record_transient_error(&request.id).await.unwrap(), 1);
    assert_eq!(registry.record_transient_error(&request.id).await.unwrap(), 2);
    registry.reset_errors(&request.id).await.unwrap();
    assert_eq!(registry.record_transient_error(&request.id).await.unwrap(), 1);

    assert!(registry.deregister(&request.id).await.unwrap());
    assert!(!registry.deregister(&request.id).await.unwrap());
    assert_eq!(registry.active_count().await.unwrap(), 0);

    // A late iteration must not bring the entry back
    registry.release(&request.id).await.unwrap();
    registry.reset_errors(&request.id).await.unwrap();
    assert!(registry.record_transient_error(&request.id).await.is_err());
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(registry.claim_due(10).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_registry_streak_writes_leave_no_orphans() {
    let ns = namespace();
    let registry = registry(&ns).await;

    let mut conn = redis::Client::open(PollRegistryConfig::from_env().redis_url)
        .unwrap()
        .get_multiplexed_async_connection()
        .await
        .unwrap();
    let id = RequestId::new();

    assert!(registry.record_transient_error(&id).await.is_err());
    registry.reset_errors(&id).await.unwrap();

    let exists: bool = redis::cmd("HEXISTS")
        .arg(format!("{}:poll:errors", ns))
        .arg(id.as_str())
        .query_async(&mut conn)
        .await
        .unwrap();
    assert!(!exists);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_store_status_and_mapping() {
    let ns = namespace();
    let store = store(&ns).await;
    let id = RequestId::new();

    store
        .put_status(&VideoStatus::processing(id.clone()).with_provider_request_id(Some("p1".into())))
        .await
        .unwrap();

    let status = store.get_status(&id).await.unwrap().unwrap();
    assert_eq!(status.status, VideoState::Processing);
    assert_eq!(store.resolve_internal_id("p1").await.unwrap(), Some(id.clone()));
    assert!(store.get_cached_result(&id).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_monitor_snapshot() {
    let ns = namespace();
    let queue = Arc::new(queue(&ns).await);
    let registry: Arc<dyn PollRegistry> = Arc::new(registry(&ns).await);
    let store: Arc<dyn JobStore> = Arc::new(store(&ns).await);

    queue
        .enqueue_submission(VideoRequest::new("demo/model", json!({})))
        .await
        .unwrap();

    let monitor = QueueMonitor::new(queue, registry, store, Duration::from_secs(60));
    let snapshot = monitor.snapshot().await.unwrap();
    assert_eq!(snapshot.queue_len, 1);
    assert_eq!(snapshot.dlq_len, 0);
    assert_eq!(snapshot.active_polls, 0);
    assert!(snapshot.store_ok);
}
