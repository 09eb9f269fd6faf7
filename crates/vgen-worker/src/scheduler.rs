//! Global poll ticker.
//!
//! One ticker per worker scans the poll registry for due jobs and runs each
//! claimed job through the polling stage, bounded by a semaphore.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use vgen_queue::PollRegistry;

use crate::error::WorkerResult;
use crate::polling::{PollOutcome, PollReport, PollingStage};
use crate::retry::FailureTracker;

pub struct PollScheduler {
    registry: Arc<dyn PollRegistry>,
    stage: Arc<PollingStage>,
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    tick: Duration,
    shutdown: watch::Sender<bool>,
}

impl PollScheduler {
    pub fn new(
        registry: Arc<dyn PollRegistry>,
        stage: Arc<PollingStage>,
        max_concurrent: usize,
        tick: Duration,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            registry,
            stage,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            tick,
            shutdown,
        }
    }

    /// Tick until shutdown, then wait up to `drain_timeout` for running polls.
    pub async fn run(&self, drain_timeout: Duration) {
        info!(
            "Starting poll scheduler: tick {:?}, {} max concurrent polls",
            self.tick, self.max_concurrent
        );

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures = FailureTracker::new(3);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping poll scheduler");
                        break;
                    }
                }
                _ = interval.tick() => {
                    match self.tick_once().await {
                        Ok(_) => failures.record_success(),
                        Err(e) => {
                            if failures.record_failure() {
                                warn!("Failed to claim due poll jobs: {}", e);
                            }
                        }
                    }
                }
            }
        }

        if tokio::time::timeout(drain_timeout, self.wait_idle())
            .await
            .is_err()
        {
            warn!(
                "Polls still running after {:?}; they come due again after one interval",
                drain_timeout
            );
        }
        info!("Poll scheduler stopped");
    }

    /// Claim due jobs up to the free capacity and start them.
    ///
    /// Returns the number of iterations started.
    pub async fn tick_once(&self) -> WorkerResult<usize> {
        let available = self.semaphore.available_permits();
        if available == 0 {
            return Ok(0);
        }

        let jobs = self.registry.claim_due(available).await?;
        let mut started = 0;

        for job in jobs {
            let Ok(permit) = Arc::clone(&self.semaphore).acquire_owned().await else {
                break;
            };
            let stage = Arc::clone(&self.stage);
            tokio::spawn(async move {
                let _permit = permit;
                let report = stage.poll(&job).await;
                log_report(&report);
            });
            started += 1;
        }

        if started > 0 {
            debug!("Started {} poll iterations", started);
        }
        Ok(started)
    }

    /// Wait until no iteration is running.
    pub async fn wait_idle(&self) {
        while self.semaphore.available_permits() < self.max_concurrent {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

fn log_report(report: &PollReport) {
    match &report.outcome {
        PollOutcome::Completed { video_url } => info!(
            request_id = %report.request_id,
            poll_count = report.poll_count,
            video_url = %video_url,
            "Poll job completed"
        ),
        PollOutcome::Failed { error } => warn!(
            request_id = %report.request_id,
            poll_count = report.poll_count,
            error = %error,
            "Poll job failed"
        ),
        PollOutcome::Retry {
            error,
            consecutive_errors,
        } => warn!(
            request_id = %report.request_id,
            poll_count = report.poll_count,
            consecutive_errors,
            error = %error,
            "Poll iteration will be retried"
        ),
        PollOutcome::Aborted { error } => warn!(
            request_id = %report.request_id,
            poll_count = report.poll_count,
            error = %error,
            "Poll iteration aborted"
        ),
        other => debug!(
            request_id = %report.request_id,
            poll_count = report.poll_count,
            outcome = other.label(),
            "Poll iteration finished"
        ),
    }
}
