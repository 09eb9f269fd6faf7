//! Periodic queue health reporting.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use vgen_queue::{JobQueue, PollRegistry};
use vgen_store::JobStore;

use crate::error::WorkerResult;
use crate::metrics;
use crate::retry::FailureTracker;

/// Point-in-time view of the pipeline backlog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub queue_len: u64,
    pub dlq_len: u64,
    pub active_polls: u64,
    pub history_len: u64,
    pub store_ok: bool,
}

pub struct QueueMonitor {
    queue: Arc<JobQueue>,
    registry: Arc<dyn PollRegistry>,
    store: Arc<dyn JobStore>,
    interval: Duration,
    shutdown: watch::Sender<bool>,
}

impl QueueMonitor {
    pub fn new(
        queue: Arc<JobQueue>,
        registry: Arc<dyn PollRegistry>,
        store: Arc<dyn JobStore>,
        interval: Duration,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            queue,
            registry,
            store,
            interval,
            shutdown,
        }
    }

    pub async fn snapshot(&self) -> WorkerResult<QueueSnapshot> {
        let queue_len = self.queue.len().await?;
        let dlq_len = self.queue.dlq_len().await?;
        let history_len = self.queue.history_len().await?;
        let active_polls = self.registry.active_count().await?;
        let store_ok = self.store.ping().await.is_ok();

        Ok(QueueSnapshot {
            queue_len,
            dlq_len,
            active_polls,
            history_len,
            store_ok,
        })
    }

    pub async fn run(&self) {
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut interval = tokio::time::interval(self.interval);
        let mut failures = FailureTracker::new(3);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    match self.snapshot().await {
                        Ok(snapshot) => {
                            failures.record_success();
                            metrics::set_queue_depths(
                                snapshot.queue_len,
                                snapshot.dlq_len,
                                snapshot.active_polls,
                            );
                            info!(
                                queue_len = snapshot.queue_len,
                                dlq_len = snapshot.dlq_len,
                                active_polls = snapshot.active_polls,
                                history_len = snapshot.history_len,
                                store_ok = snapshot.store_ok,
                                "Queue health"
                            );
                            if snapshot.dlq_len > 0 {
                                warn!("{} submissions in the dead letter queue", snapshot.dlq_len);
                            }
                        }
                        Err(e) => {
                            if failures.record_failure() {
                                warn!("Failed to read queue health: {}", e);
                            }
                        }
                    }
                }
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}
