//! Polling stage: one iteration of a recurring poll job.
//!
//! Each iteration reads the stored status, asks the provider for progress and
//! records the transition. Terminal transitions deregister the job and then
//! fire the completion side effects. Side effects only run for the iteration
//! whose deregistration actually removed the job, so they happen once even if
//! two workers race on the same entry. Non-terminal iterations release the
//! job back to the registry when they finish, so the next invocation of the
//! same job never starts while this one is still running.

use std::sync::Arc;

use tracing::{debug, warn, Instrument};

use vgen_models::{CachedResult, NotificationUpdate, PollJob, RequestId, VideoStatus};
use vgen_provider::{extract_video_url, ProviderClient, ProviderError, ProviderState};
use vgen_queue::PollRegistry;
use vgen_services::{AssetPersistence, Notifier, SaveVideoRequest};
use vgen_store::JobStore;

use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;

const DEFAULT_FAILURE_MESSAGE: &str = "Video generation failed";
const VIDEO_NAME_LEN: usize = 50;

/// Bounds on how long a job may keep polling.
#[derive(Debug, Clone, Copy)]
pub struct PollLimits {
    /// Transient provider errors in a row before the job fails
    pub max_consecutive_errors: u32,
    /// Invocations before a job that never settles fails
    pub max_polls: u32,
}

impl Default for PollLimits {
    fn default() -> Self {
        Self {
            max_consecutive_errors: 5,
            max_polls: 10,
        }
    }
}

/// What one iteration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Status was already terminal; the job was removed without side effects.
    AlreadyTerminal,
    /// Provider still has the request queued.
    Pending,
    /// Provider is generating.
    Processing,
    Completed { video_url: String },
    Failed { error: String },
    /// Transient provider error; the next tick tries again.
    Retry { error: String, consecutive_errors: u32 },
    /// Store or registry error; the job stays scheduled.
    Aborted { error: String },
}

impl PollOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            PollOutcome::AlreadyTerminal => "already_terminal",
            PollOutcome::Pending => "pending",
            PollOutcome::Processing => "processing",
            PollOutcome::Completed { .. } => "completed",
            PollOutcome::Failed { .. } => "failed",
            PollOutcome::Retry { .. } => "retry",
            PollOutcome::Aborted { .. } => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PollOutcome::AlreadyTerminal | PollOutcome::Completed { .. } | PollOutcome::Failed { .. }
        )
    }
}

/// Structured result of a poll iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollReport {
    pub request_id: RequestId,
    pub poll_count: u32,
    pub outcome: PollOutcome,
}

/// Per-iteration values shared by the transition helpers.
struct Iteration<'a> {
    job: &'a PollJob,
    provider_request_id: Option<String>,
    notification_id: Option<String>,
    logger: JobLogger,
}

pub struct PollingStage {
    store: Arc<dyn JobStore>,
    provider: Arc<dyn ProviderClient>,
    registry: Arc<dyn PollRegistry>,
    persistence: Option<Arc<dyn AssetPersistence>>,
    notifier: Option<Arc<dyn Notifier>>,
    limits: PollLimits,
}

impl PollingStage {
    pub fn new(
        store: Arc<dyn JobStore>,
        provider: Arc<dyn ProviderClient>,
        registry: Arc<dyn PollRegistry>,
        limits: PollLimits,
    ) -> Self {
        Self {
            store,
            provider,
            registry,
            persistence: None,
            notifier: None,
            limits,
        }
    }

    pub fn with_persistence(mut self, persistence: Option<Arc<dyn AssetPersistence>>) -> Self {
        self.persistence = persistence;
        self
    }

    pub fn with_notifier(mut self, notifier: Option<Arc<dyn Notifier>>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Run one iteration. Never fails; errors become part of the report.
    pub async fn poll(&self, job: &PollJob) -> PollReport {
        let logger = JobLogger::new(&job.request_id, &job.provider, "poll");
        let span = logger.create_span();
        debug!(request_id = %job.request_id, poll_count = job.poll_count, "Polling provider");

        let outcome = match self.run(job, logger.clone()).instrument(span).await {
            Ok(outcome) => outcome,
            Err(e) => {
                logger.log_error(&format!("iteration aborted: {}", e));
                PollOutcome::Aborted {
                    error: e.to_string(),
                }
            }
        };

        // The claim leased the entry; hand it back for the next interval
        if !outcome.is_terminal() {
            if let Err(e) = self.registry.release(&job.request_id).await {
                logger.log_warning(&format!("failed to release poll job: {}", e));
            }
        }

        metrics::record_poll(outcome.label());
        PollReport {
            request_id: job.request_id.clone(),
            poll_count: job.poll_count,
            outcome,
        }
    }

    async fn run(&self, job: &PollJob, logger: JobLogger) -> WorkerResult<PollOutcome> {
        let status = self.store.get_status(&job.request_id).await?;

        if status.as_ref().is_some_and(|s| s.is_terminal()) {
            self.registry.deregister(&job.request_id).await?;
            logger.log_progress("status already terminal, polling stopped");
            return Ok(PollOutcome::AlreadyTerminal);
        }

        let notification_id = status
            .as_ref()
            .and_then(|s| s.notification_id.clone())
            .or_else(|| job.notification_id.clone());
        let provider_request_id = status
            .and_then(|s| s.provider_request_id)
            .filter(|id| !id.trim().is_empty());

        let iteration = Iteration {
            job,
            provider_request_id: provider_request_id.clone(),
            notification_id,
            logger,
        };

        let Some(provider_request_id) = provider_request_id else {
            return self
                .fail(&iteration, WorkerError::MissingProviderRequestId)
                .await;
        };

        let response = match self
            .provider
            .status(&job.provider, &provider_request_id)
            .await
        {
            Ok(response) => response,
            Err(e) => return self.provider_error(&iteration, e).await,
        };

        if job.consecutive_errors > 0 {
            self.registry.reset_errors(&job.request_id).await?;
        }

        match response.status {
            ProviderState::Completed => self.complete(&iteration, &provider_request_id).await,
            ProviderState::Failed => {
                let message = response
                    .error_message()
                    .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string());
                self.fail(&iteration, WorkerError::generation_failed(message))
                    .await
            }
            ProviderState::InProgress => {
                self.store
                    .put_status(&self.non_terminal(&iteration, VideoStatus::processing(job.request_id.clone())))
                    .await?;
                self.check_ceiling(&iteration, PollOutcome::Processing).await
            }
            ProviderState::InQueue => {
                self.store
                    .put_status(&self.non_terminal(&iteration, VideoStatus::pending(job.request_id.clone())))
                    .await?;
                self.check_ceiling(&iteration, PollOutcome::Pending).await
            }
        }
    }

    fn non_terminal(&self, iteration: &Iteration<'_>, status: VideoStatus) -> VideoStatus {
        status
            .with_provider_request_id(iteration.provider_request_id.clone())
            .with_notification_id(iteration.notification_id.clone())
    }

    async fn complete(
        &self,
        iteration: &Iteration<'_>,
        provider_request_id: &str,
    ) -> WorkerResult<PollOutcome> {
        let job = iteration.job;

        let data = match self.provider.result(&job.provider, provider_request_id).await {
            Ok(data) => data,
            Err(e) => return self.provider_error(iteration, e).await,
        };

        let Some(found) = extract_video_url(&data) else {
            return self.fail(iteration, WorkerError::VideoUrlNotFound).await;
        };
        iteration
            .logger
            .log_progress(&format!("video URL found under '{}'", found.alias));

        let status = VideoStatus::completed(job.request_id.clone(), &found.url, data)
            .with_provider_request_id(iteration.provider_request_id.clone())
            .with_notification_id(iteration.notification_id.clone());
        self.store.put_status(&status).await?;
        self.cache_result(&status).await;

        if self.registry.deregister(&job.request_id).await? {
            metrics::record_completed();
            self.persist(iteration, &found.url).await;
            self.notify(iteration, NotificationUpdate::completed(found.url.as_str()))
                .await;
            iteration.logger.log_completion(&found.url);
        }

        Ok(PollOutcome::Completed {
            video_url: found.url,
        })
    }

    async fn fail(&self, iteration: &Iteration<'_>, error: WorkerError) -> WorkerResult<PollOutcome> {
        let job = iteration.job;
        let message = error.to_string();

        let status = VideoStatus::failed(job.request_id.clone(), message.clone())
            .with_provider_request_id(iteration.provider_request_id.clone())
            .with_notification_id(iteration.notification_id.clone());
        self.store.put_status(&status).await?;
        self.cache_result(&status).await;

        if self.registry.deregister(&job.request_id).await? {
            metrics::record_failed(error.kind());
            self.notify(iteration, NotificationUpdate::failed(error.user_message()))
                .await;
            iteration.logger.log_error(&message);
        }

        Ok(PollOutcome::Failed { error: message })
    }

    async fn provider_error(
        &self,
        iteration: &Iteration<'_>,
        error: ProviderError,
    ) -> WorkerResult<PollOutcome> {
        if error.is_fatal() {
            return self.fail(iteration, error.into()).await;
        }

        let job = iteration.job;
        let streak = self.registry.record_transient_error(&job.request_id).await?;
        iteration.logger.log_warning(&format!(
            "transient provider error ({}/{}): {}",
            streak, self.limits.max_consecutive_errors, error
        ));

        if streak >= self.limits.max_consecutive_errors {
            return self.fail(iteration, error.into()).await;
        }

        self.check_ceiling(
            iteration,
            PollOutcome::Retry {
                error: error.to_string(),
                consecutive_errors: streak,
            },
        )
        .await
    }

    /// Fail jobs that reached the invocation ceiling without settling.
    async fn check_ceiling(
        &self,
        iteration: &Iteration<'_>,
        outcome: PollOutcome,
    ) -> WorkerResult<PollOutcome> {
        if iteration.job.poll_count >= self.limits.max_polls {
            return self
                .fail(iteration, WorkerError::PollingLimitExceeded)
                .await;
        }
        Ok(outcome)
    }

    async fn cache_result(&self, status: &VideoStatus) {
        if let Err(e) = self
            .store
            .put_cached_result(&status.request_id, &CachedResult::from(status))
            .await
        {
            warn!(request_id = %status.request_id, "Failed to cache result: {}", e);
        }
    }

    async fn persist(&self, iteration: &Iteration<'_>, video_url: &str) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        let request = save_request(iteration.job, video_url);
        if let Err(e) = persistence.save_video_from_url(&request).await {
            iteration
                .logger
                .log_warning(&format!("failed to persist video: {}", e));
        }
    }

    async fn notify(&self, iteration: &Iteration<'_>, update: NotificationUpdate) {
        let (Some(notifier), Some(notification_id)) = (&self.notifier, &iteration.notification_id)
        else {
            return;
        };

        if let Err(e) = notifier.update(notification_id, &update).await {
            iteration
                .logger
                .log_warning(&format!("failed to update notification: {}", e));
        }
    }
}

/// Build the persistence call for a completed job.
fn save_request(job: &PollJob, video_url: &str) -> SaveVideoRequest {
    let prompt = job.prompt().unwrap_or_default().to_string();
    let model = job
        .provider
        .split_once('/')
        .map(|(_, model)| model)
        .unwrap_or(&job.provider)
        .to_string();
    let video_name = if prompt.trim().is_empty() {
        format!("video-{}", job.request_id)
    } else {
        prompt.chars().take(VIDEO_NAME_LEN).collect()
    };
    let reference_url = job
        .params
        .get("image_url")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    SaveVideoRequest {
        prompt,
        endpoint: job.provider.clone(),
        model,
        video_name,
        video_url: video_url.to_string(),
        reference_url,
        user_id: job.user_id.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{RecordingNotifier, RecordingPersistence, ScriptedProvider};
    use serde_json::json;
    use std::time::Duration;
    use vgen_models::{NotificationStatus, VideoRequest, VideoState};
    use vgen_provider::StatusResponse;
    use vgen_queue::MemoryPollRegistry;
    use vgen_store::MemoryJobStore;

    const INTERVAL: Duration = Duration::from_secs(10);

    struct Harness {
        store: Arc<MemoryJobStore>,
        provider: Arc<ScriptedProvider>,
        registry: Arc<MemoryPollRegistry>,
        notifier: Arc<RecordingNotifier>,
        persistence: Arc<RecordingPersistence>,
        stage: PollingStage,
        job: PollJob,
    }

    async fn harness() -> Harness {
        let store = Arc::new(MemoryJobStore::new());
        let provider = Arc::new(ScriptedProvider::new());
        let registry = Arc::new(MemoryPollRegistry::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let persistence = Arc::new(RecordingPersistence::new());

        let request = VideoRequest::with_id(
            RequestId::from("r1"),
            "fal-ai/demo-model/v1",
            json!({"prompt": "waves", "image_url": "https://ref/img.png"}),
        )
        .with_user("u1")
        .with_notification("n1");
        let job = PollJob::for_request(&request, "p1");

        store
            .put_status(
                &VideoStatus::processing(request.id.clone())
                    .with_provider_request_id(Some("p1".into()))
                    .with_notification_id(Some("n1".into())),
            )
            .await
            .unwrap();
        registry.register(&job, INTERVAL).await.unwrap();

        let stage = PollingStage::new(
            store.clone(),
            provider.clone(),
            registry.clone(),
            PollLimits::default(),
        )
        .with_notifier(Some(notifier.clone() as Arc<dyn Notifier>))
        .with_persistence(Some(persistence.clone() as Arc<dyn AssetPersistence>));

        Harness {
            store,
            provider,
            registry,
            notifier,
            persistence,
            stage,
            job,
        }
    }

    impl Harness {
        /// Advance to the next due time and run one claimed iteration.
        async fn tick(&self) -> PollReport {
            tokio::time::advance(INTERVAL).await;
            let mut claimed = self.registry.claim_due(1).await.unwrap();
            let job = claimed.pop().expect("job should be due");
            self.stage.poll(&job).await
        }

        async fn status(&self) -> VideoStatus {
            self.store.get_status(&self.job.request_id).await.unwrap().unwrap()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_progress_then_completed() {
        let h = harness().await;
        h.provider.push_state(ProviderState::InProgress);
        h.provider.push_state(ProviderState::Completed);
        h.provider
            .push_result(Ok(json!({"video": {"url": "https://x/y.mp4"}})));

        let first = h.tick().await;
        assert_eq!(first.poll_count, 1);
        assert_eq!(first.outcome, PollOutcome::Processing);
        assert_eq!(h.status().await.status, VideoState::Processing);

        let second = h.tick().await;
        assert_eq!(second.poll_count, 2);
        assert_eq!(
            second.outcome,
            PollOutcome::Completed {
                video_url: "https://x/y.mp4".into()
            }
        );

        let status = h.status().await;
        assert_eq!(status.status, VideoState::Completed);
        assert_eq!(status.video_url(), Some("https://x/y.mp4"));
        assert_eq!(status.provider_request_id.as_deref(), Some("p1"));

        let cached = h.store.get_cached_result(&h.job.request_id).await.unwrap().unwrap();
        assert_eq!(cached.status, VideoState::Completed);

        let saved = h.persistence.saved();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].video_url, "https://x/y.mp4");
        assert_eq!(saved[0].model, "demo-model/v1");
        assert_eq!(saved[0].reference_url.as_deref(), Some("https://ref/img.png"));

        let updates = h.notifier.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].1.status, NotificationStatus::Completed);
        assert_eq!(updates[0].1.thumbnail_url.as_deref(), Some("https://x/y.mp4"));

        assert_eq!(h.registry.deregistrations().await, vec![h.job.request_id.clone()]);
    }

    #[tokio::test]
    async fn test_in_queue_writes_pending() {
        let h = harness().await;
        h.provider.push_state(ProviderState::InQueue);

        let report = h.stage.poll(&PollJob { poll_count: 1, ..h.job.clone() }).await;
        assert_eq!(report.outcome, PollOutcome::Pending);
        let status = h.status().await;
        assert_eq!(status.status, VideoState::Pending);
        assert_eq!(status.notification_id.as_deref(), Some("n1"));
    }

    #[tokio::test]
    async fn test_completed_without_url_fails() {
        let h = harness().await;
        h.provider.push_state(ProviderState::Completed);
        h.provider.push_result(Ok(json!({"images": [{"url": "https://x/a.png"}]})));

        let report = h.stage.poll(&PollJob { poll_count: 1, ..h.job.clone() }).await;
        assert_eq!(
            report.outcome,
            PollOutcome::Failed {
                error: "Video URL not found in provider result".into()
            }
        );

        let status = h.status().await;
        assert_eq!(status.status, VideoState::Failed);
        assert!(h.persistence.saved().is_empty());
        assert_eq!(h.registry.active_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_provider_failure_uses_message_or_default() {
        let h = harness().await;
        h.provider
            .push_status(Ok(StatusResponse::new(ProviderState::Failed).with_error("content policy")));

        let report = h.stage.poll(&PollJob { poll_count: 1, ..h.job.clone() }).await;
        assert_eq!(
            report.outcome,
            PollOutcome::Failed {
                error: "content policy".into()
            }
        );
        assert_eq!(
            h.notifier.updates()[0].1.error_message.as_deref(),
            Some("content policy")
        );

        let h = harness().await;
        h.provider.push_state(ProviderState::Failed);
        let report = h.stage.poll(&PollJob { poll_count: 1, ..h.job.clone() }).await;
        assert_eq!(
            report.outcome,
            PollOutcome::Failed {
                error: "Video generation failed".into()
            }
        );
    }

    #[tokio::test]
    async fn test_not_found_on_first_poll_fails_immediately() {
        let h = harness().await;
        h.provider
            .push_status(Err(ProviderError::from_http_status(404, "unknown request")));

        let report = h.stage.poll(&PollJob { poll_count: 1, ..h.job.clone() }).await;
        assert!(matches!(report.outcome, PollOutcome::Failed { .. }));
        assert_eq!(h.status().await.status, VideoState::Failed);
        assert_eq!(h.registry.active_count().await.unwrap(), 0);
        assert_eq!(h.provider.status_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_five_transient_errors_fail_the_job() {
        let h = harness().await;
        for _ in 0..5 {
            h.provider
                .push_status(Err(ProviderError::from_http_status(502, "bad gateway")));
        }

        for expected in 1..=4 {
            let report = h.tick().await;
            assert_eq!(
                report.outcome,
                PollOutcome::Retry {
                    error: "Provider rejected request (502): bad gateway".into(),
                    consecutive_errors: expected,
                }
            );
            assert_eq!(h.status().await.status, VideoState::Processing);
        }

        let fifth = h.tick().await;
        assert!(matches!(fifth.outcome, PollOutcome::Failed { .. }));
        assert_eq!(h.status().await.status, VideoState::Failed);

        // Nothing left to claim
        tokio::time::advance(INTERVAL).await;
        assert!(h.registry.claim_due(10).await.unwrap().is_empty());
        assert_eq!(h.provider.status_calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_error_streak() {
        let h = harness().await;
        for _ in 0..4 {
            h.provider
                .push_status(Err(ProviderError::from_http_status(500, "")));
        }
        h.provider.push_state(ProviderState::InProgress);
        h.provider
            .push_status(Err(ProviderError::from_http_status(500, "")));

        for _ in 0..5 {
            h.tick().await;
        }
        let report = h.tick().await;
        assert!(matches!(
            report.outcome,
            PollOutcome::Retry {
                consecutive_errors: 1,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_poll_ceiling_fails_unsettled_job() {
        let h = harness().await;
        h.provider.push_state(ProviderState::InProgress);

        let report = h.stage.poll(&PollJob { poll_count: 10, ..h.job.clone() }).await;
        assert_eq!(
            report.outcome,
            PollOutcome::Failed {
                error: "Polling limit exceeded".into()
            }
        );
        assert_eq!(h.registry.active_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ceiling_counts_transient_error_iterations() {
        let h = harness().await;
        h.provider
            .push_status(Err(ProviderError::from_http_status(503, "")));

        let report = h.stage.poll(&PollJob { poll_count: 10, ..h.job.clone() }).await;
        assert_eq!(
            report.outcome,
            PollOutcome::Failed {
                error: "Polling limit exceeded".into()
            }
        );
    }

    #[tokio::test]
    async fn test_completion_on_last_allowed_poll_wins_over_ceiling() {
        let h = harness().await;
        h.provider.push_state(ProviderState::Completed);
        h.provider.push_result(Ok(json!({"video_url": "https://x/z.mp4"})));

        let report = h.stage.poll(&PollJob { poll_count: 10, ..h.job.clone() }).await;
        assert!(matches!(report.outcome, PollOutcome::Completed { .. }));
    }

    #[tokio::test]
    async fn test_terminal_status_is_idempotent_noop() {
        let h = harness().await;
        h.store
            .put_status(&VideoStatus::failed(h.job.request_id.clone(), "earlier"))
            .await
            .unwrap();
        let writes_before = h.store.status_writes(&h.job.request_id).await.len();

        let report = h.stage.poll(&PollJob { poll_count: 3, ..h.job.clone() }).await;
        assert_eq!(report.outcome, PollOutcome::AlreadyTerminal);
        assert_eq!(h.provider.status_calls(), 0);
        assert_eq!(h.store.status_writes(&h.job.request_id).await.len(), writes_before);
        assert!(h.notifier.updates().is_empty());
        assert_eq!(h.registry.active_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_provider_id_fails() {
        let h = harness().await;
        h.store
            .put_status(
                &VideoStatus::processing(h.job.request_id.clone())
                    .with_notification_id(Some("n1".into())),
            )
            .await
            .unwrap();

        let report = h.stage.poll(&PollJob { poll_count: 1, ..h.job.clone() }).await;
        assert_eq!(
            report.outcome,
            PollOutcome::Failed {
                error: "Missing provider request id".into()
            }
        );
        assert_eq!(h.provider.status_calls(), 0);
        assert_eq!(h.notifier.updates()[0].0, "n1");
    }

    #[tokio::test]
    async fn test_missing_status_record_is_treated_as_missing_provider_id() {
        let h = harness().await;
        let orphan = PollJob {
            request_id: RequestId::from("ghost"),
            poll_count: 1,
            ..h.job.clone()
        };

        let report = h.stage.poll(&orphan).await;
        assert!(matches!(report.outcome, PollOutcome::Failed { .. }));
        assert_eq!(
            h.store.get_status(&orphan.request_id).await.unwrap().unwrap().status,
            VideoState::Failed
        );
    }

    #[tokio::test]
    async fn test_store_outage_aborts_and_keeps_job() {
        let h = harness().await;
        h.store.set_unavailable(true);

        let report = h.stage.poll(&PollJob { poll_count: 1, ..h.job.clone() }).await;
        assert!(matches!(report.outcome, PollOutcome::Aborted { .. }));
        assert_eq!(h.registry.active_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_side_effect_failures_do_not_revert_completion() {
        let h = harness().await;
        h.persistence.set_failing(true);
        h.notifier.set_failing(true);
        h.provider.push_state(ProviderState::Completed);
        h.provider.push_result(Ok(json!({"videoUrl": "https://x/y.mp4"})));

        let report = h.stage.poll(&PollJob { poll_count: 1, ..h.job.clone() }).await;
        assert!(matches!(report.outcome, PollOutcome::Completed { .. }));
        assert_eq!(h.status().await.status, VideoState::Completed);
    }

    #[tokio::test]
    async fn test_completion_without_user_still_persists() {
        let h = harness().await;
        h.provider.push_state(ProviderState::Completed);
        h.provider.push_result(Ok(json!({"video": {"url": "https://x/y.mp4"}})));

        let job = PollJob {
            user_id: None,
            poll_count: 1,
            ..h.job.clone()
        };
        let report = h.stage.poll(&job).await;
        assert!(matches!(report.outcome, PollOutcome::Completed { .. }));

        let saved = h.persistence.saved();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].video_url, "https://x/y.mp4");
        assert_eq!(saved[0].user_id, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_terminal_iteration_releases_job() {
        let h = harness().await;
        h.provider.push_state(ProviderState::InQueue);

        let first = h.tick().await;
        assert_eq!(first.outcome, PollOutcome::Pending);

        // Released at the end of the iteration, due again one interval later
        tokio::time::advance(INTERVAL - Duration::from_millis(1)).await;
        assert!(h.registry.claim_due(1).await.unwrap().is_empty());
        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(h.registry.claim_due(1).await.unwrap()[0].poll_count, 2);
    }

    #[tokio::test]
    async fn test_side_effects_skip_when_another_worker_deregistered() {
        let h = harness().await;
        h.registry.deregister(&h.job.request_id).await.unwrap();
        h.provider.push_state(ProviderState::Completed);
        h.provider.push_result(Ok(json!({"video": {"url": "https://x/y.mp4"}})));

        let report = h.stage.poll(&PollJob { poll_count: 1, ..h.job.clone() }).await;
        assert!(matches!(report.outcome, PollOutcome::Completed { .. }));
        assert!(h.notifier.updates().is_empty());
        assert!(h.persistence.saved().is_empty());
    }

    #[test]
    fn test_save_request_without_user() {
        let request = VideoRequest::with_id(RequestId::from("r9"), "demo/model", json!({}));
        let job = PollJob::for_request(&request, "p9");

        let save = save_request(&job, "https://x");
        assert_eq!(save.user_id, None);
        assert_eq!(save.video_name, "video-r9");
        assert_eq!(save.endpoint, "demo/model");
        assert_eq!(save.model, "model");
    }
}
