//! Submission stage: hand a request to the provider and schedule polling.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use vgen_models::{CreateNotification, NotificationUpdate, PollJob, VideoRequest, VideoStatus};
use vgen_provider::ProviderClient;
use vgen_queue::PollRegistry;
use vgen_services::Notifier;
use vgen_store::JobStore;

use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;

const NOTIFICATION_TITLE_LEN: usize = 80;

/// Runs one submission attempt at a time. Retries are the caller's concern.
pub struct SubmissionStage {
    store: Arc<dyn JobStore>,
    provider: Arc<dyn ProviderClient>,
    registry: Arc<dyn PollRegistry>,
    notifier: Option<Arc<dyn Notifier>>,
    poll_interval: Duration,
}

impl SubmissionStage {
    pub fn new(
        store: Arc<dyn JobStore>,
        provider: Arc<dyn ProviderClient>,
        registry: Arc<dyn PollRegistry>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            registry,
            notifier: None,
            poll_interval,
        }
    }

    pub fn with_notifier(mut self, notifier: Option<Arc<dyn Notifier>>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Give the request a notification feed entry if it has none.
    ///
    /// Runs before the first attempt of every delivery. An entry created by an
    /// earlier delivery is read back from the status record and reused.
    /// Failures are logged and the request continues without a notification.
    pub async fn ensure_notification(&self, mut request: VideoRequest) -> VideoRequest {
        if request.notification_id.is_some() {
            return request;
        }
        let Some(notifier) = &self.notifier else {
            return request;
        };

        let existing = match self.store.get_status(&request.id).await {
            Ok(existing) => existing,
            Err(e) => {
                warn!(request_id = %request.id, "Failed to read status before notifying: {}", e);
                None
            }
        };
        if let Some(id) = existing.as_ref().and_then(|s| s.notification_id.clone()) {
            debug!(request_id = %request.id, notification_id = %id, "Reusing notification");
            request.notification_id = Some(id);
            return request;
        }

        let title = match request.prompt() {
            Some(prompt) if !prompt.trim().is_empty() => {
                prompt.chars().take(NOTIFICATION_TITLE_LEN).collect()
            }
            _ => "Generating video".to_string(),
        };
        let thumbnail_url = request
            .params
            .get("image_url")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        match notifier
            .create(&CreateNotification {
                title,
                thumbnail_url,
            })
            .await
        {
            Ok(id) => {
                debug!(request_id = %request.id, notification_id = %id, "Created notification");
                let status = existing
                    .unwrap_or_else(|| VideoStatus::pending(request.id.clone()))
                    .with_notification_id(Some(id.clone()));
                if let Err(e) = self.store.put_status(&status).await {
                    warn!(request_id = %request.id, "Failed to record notification id: {}", e);
                }
                request.notification_id = Some(id);
            }
            Err(e) => {
                warn!(request_id = %request.id, "Failed to create notification: {}", e);
            }
        }
        request
    }

    /// Run one submission attempt.
    ///
    /// On failure the status is set to failed and the feed is told before the
    /// error is returned, so every attempt leaves a consistent record.
    pub async fn submit(&self, request: &VideoRequest) -> WorkerResult<PollJob> {
        let logger = JobLogger::new(&request.id, &request.provider, "submission");
        logger.log_start("submitting to provider");

        match self.try_submit(request).await {
            Ok(job) => {
                metrics::record_submission("submitted");
                logger.log_completion(&format!(
                    "provider request {} scheduled for polling",
                    job.provider_request_id
                ));
                Ok(job)
            }
            Err(e) => {
                metrics::record_submission("failed");
                logger.log_error(&e.to_string());
                self.mark_failed(request, &e).await;
                Err(e)
            }
        }
    }

    async fn try_submit(&self, request: &VideoRequest) -> WorkerResult<PollJob> {
        self.store
            .put_status(
                &VideoStatus::processing(request.id.clone())
                    .with_notification_id(request.notification_id.clone()),
            )
            .await?;

        let response = self
            .provider
            .submit(&request.provider, &request.params)
            .await?;
        let provider_request_id = response.request_id.trim().to_string();
        if provider_request_id.is_empty() {
            return Err(WorkerError::MissingProviderRequestId);
        }

        self.store
            .put_status(
                &VideoStatus::processing(request.id.clone())
                    .with_provider_request_id(Some(provider_request_id.clone()))
                    .with_notification_id(request.notification_id.clone()),
            )
            .await?;

        let job = PollJob::for_request(request, provider_request_id);
        self.registry.register(&job, self.poll_interval).await?;
        Ok(job)
    }

    async fn mark_failed(&self, request: &VideoRequest, error: &WorkerError) {
        let status = VideoStatus::failed(request.id.clone(), error.to_string())
            .with_notification_id(request.notification_id.clone());
        if let Err(e) = self.store.put_status(&status).await {
            warn!(request_id = %request.id, "Failed to record submission failure: {}", e);
        }

        if let (Some(notifier), Some(notification_id)) = (&self.notifier, &request.notification_id)
        {
            let update = NotificationUpdate::failed(error.user_message());
            if let Err(e) = notifier.update(notification_id, &update).await {
                warn!(request_id = %request.id, "Failed to notify submission failure: {}", e);
            }
        }
    }
}
