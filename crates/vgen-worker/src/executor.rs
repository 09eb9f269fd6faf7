//! Submission executor.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vgen_models::SubmissionRecord;
use vgen_queue::{JobQueue, QueueJob};

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::retry::{retry_async, FailureTracker, RetryConfig, RetryResult};
use crate::submission::SubmissionStage;

/// Consumes submission messages from the queue and runs them through the
/// submission stage with bounded, backed-off retries.
pub struct SubmissionExecutor {
    config: WorkerConfig,
    queue: Arc<JobQueue>,
    stage: Arc<SubmissionStage>,
    semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
}

impl SubmissionExecutor {
    pub fn new(config: WorkerConfig, queue: Arc<JobQueue>, stage: Arc<SubmissionStage>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_submissions));
        let (shutdown, _) = watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            config,
            queue,
            stage,
            semaphore,
            shutdown,
            consumer_name,
        }
    }

    /// Start the executor. Returns after shutdown once in-flight work drained.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting submission executor '{}' with {} max concurrent submissions",
            self.consumer_name, self.config.max_concurrent_submissions
        );

        self.queue.init().await?;

        let mut shutdown_rx = self.shutdown.subscribe();
        let claim_task = self.spawn_claim_task();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping submission executor");
                        break;
                    }
                }
                result = self.consume_jobs() => {
                    if let Err(e) = result {
                        error!("Error consuming submissions: {}", e);
                        // Back off on error
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        claim_task.abort();

        info!("Waiting for in-flight submissions to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                "Submissions still running after {:?}; they will be reclaimed by another worker",
                self.config.shutdown_timeout
            );
        }

        info!("Submission executor stopped");
        Ok(())
    }

    /// Periodically claim messages left pending by crashed workers.
    fn spawn_claim_task(&self) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let stage = Arc::clone(&self.stage);
        let semaphore = Arc::clone(&self.semaphore);
        let consumer_name = self.consumer_name.clone();
        let retry = self.config.submit_retry();
        let claim_interval = self.config.claim_interval;
        let min_idle_ms = self.config.claim_min_idle.as_millis() as u64;
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(claim_interval);
            let mut failures = FailureTracker::new(3);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        match queue.claim_pending(&consumer_name, min_idle_ms, 5).await {
                            Ok(jobs) => {
                                failures.record_success();
                                if !jobs.is_empty() {
                                    info!("Claimed {} pending submissions", jobs.len());
                                }
                                for (message_id, job) in jobs {
                                    let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                                        break;
                                    };
                                    let queue = Arc::clone(&queue);
                                    let stage = Arc::clone(&stage);
                                    let retry = retry.clone();
                                    tokio::spawn(async move {
                                        let _permit = permit;
                                        Self::execute_job(queue, stage, retry, message_id, job).await;
                                    });
                                }
                            }
                            Err(e) => {
                                if failures.record_failure() {
                                    warn!("Failed to claim pending submissions: {}", e);
                                }
                            }
                        }
                    }
                }
            }
        })
    }

    /// Consume and start submissions from the queue.
    async fn consume_jobs(&self) -> WorkerResult<()> {
        let available = self.semaphore.available_permits();
        if available == 0 {
            // All slots busy, wait a bit
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let jobs = self
            .queue
            .consume(&self.consumer_name, 1000, available.min(5))
            .await?;

        if jobs.is_empty() {
            return Ok(());
        }

        debug!("Consumed {} submissions from queue", jobs.len());

        for (message_id, job) in jobs {
            let Ok(permit) = Arc::clone(&self.semaphore).acquire_owned().await else {
                break;
            };
            let queue = Arc::clone(&self.queue);
            let stage = Arc::clone(&self.stage);
            let retry = self.config.submit_retry();

            tokio::spawn(async move {
                let _permit = permit;
                Self::execute_job(queue, stage, retry, message_id, job).await;
            });
        }

        Ok(())
    }

    /// Run a submission with retries, then ack it or move it to the DLQ.
    async fn execute_job(
        queue: Arc<JobQueue>,
        stage: Arc<SubmissionStage>,
        retry: RetryConfig,
        message_id: String,
        job: QueueJob,
    ) {
        let request_id = job.request_id().clone();

        // Counts deliveries, so a message that keeps killing workers still ends up in the DLQ
        let deliveries = match queue.increment_retry(&message_id).await {
            Ok(n) => n,
            Err(e) => {
                warn!(request_id = %request_id, "Failed to count delivery: {}", e);
                1
            }
        };
        if deliveries > queue.max_attempts() {
            warn!(
                request_id = %request_id,
                "Submission delivered {} times, moving to DLQ", deliveries
            );
            Self::settle(&queue, &message_id, &job, Some("delivery limit exceeded")).await;
            return;
        }

        let QueueJob::SubmitVideo(submit) = &job;
        let request = stage.ensure_notification(submit.request.clone()).await;

        let result = retry_async(&retry, |attempt| {
            let queue = Arc::clone(&queue);
            let stage = Arc::clone(&stage);
            let request = request.clone();
            async move {
                let result = stage.submit(&request).await;
                let record = match &result {
                    Ok(poll_job) => SubmissionRecord::submitted(
                        request.id.clone(),
                        attempt,
                        poll_job.provider_request_id.clone(),
                    ),
                    Err(e) => SubmissionRecord::failed(request.id.clone(), attempt, e.to_string()),
                };
                if let Err(e) = queue.record_submission(&record).await {
                    warn!(request_id = %request.id, "Failed to record submission history: {}", e);
                }
                result
            }
        })
        .await;

        match result {
            RetryResult::Success { attempts, .. } => {
                info!(request_id = %request_id, attempts, "Submission accepted by provider");
                Self::settle(&queue, &message_id, &job, None).await;
            }
            RetryResult::Failed { error, attempts } => {
                error!(
                    request_id = %request_id,
                    attempts,
                    "Submission failed after all attempts: {}", error
                );
                Self::settle(&queue, &message_id, &job, Some(&error.to_string())).await;
            }
        }
    }

    /// Remove the message from the stream, optionally via the DLQ, and clear
    /// its dedup and delivery keys.
    async fn settle(queue: &JobQueue, message_id: &str, job: &QueueJob, dlq_reason: Option<&str>) {
        let request_id = job.request_id();
        let removed = match dlq_reason {
            Some(reason) => queue.dlq(message_id, job, reason).await,
            None => queue.ack(message_id).await,
        };
        if let Err(e) = removed {
            error!(request_id = %request_id, "Failed to settle message {}: {}", message_id, e);
        }
        // Clear dedup key so the same request can be submitted again later
        if let Err(e) = queue.clear_dedup(job).await {
            warn!(request_id = %request_id, "Failed to clear dedup key: {}", e);
        }
        if let Err(e) = queue.clear_retry(message_id).await {
            debug!(request_id = %request_id, "Failed to clear delivery counter: {}", e);
        }
    }

    /// Wait for all in-flight submissions to complete.
    async fn wait_for_jobs(&self) {
        while self.semaphore.available_permits() < self.config.max_concurrent_submissions {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }
}
