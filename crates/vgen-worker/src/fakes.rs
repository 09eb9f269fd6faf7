//! Scripted collaborators for stage tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use vgen_models::{CreateNotification, NotificationUpdate};
use vgen_provider::{
    ProviderClient, ProviderError, ProviderResult, ProviderState, StatusResponse, SubmitResponse,
};
use vgen_services::{AssetPersistence, Notifier, SaveVideoRequest, SavedVideo, ServiceError, ServiceResult};

/// Provider that replays queued responses.
///
/// An empty status script answers IN_PROGRESS; an empty submit script answers `p1`.
#[derive(Default)]
pub struct ScriptedProvider {
    submits: Mutex<VecDeque<ProviderResult<SubmitResponse>>>,
    statuses: Mutex<VecDeque<ProviderResult<StatusResponse>>>,
    results: Mutex<VecDeque<ProviderResult<Value>>>,
    status_delays: Mutex<VecDeque<Duration>>,
    submit_calls: AtomicU32,
    status_calls: AtomicU32,
    result_calls: AtomicU32,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_submit(&self, response: Result<&str, ProviderError>) {
        self.submits.lock().unwrap().push_back(response.map(|id| SubmitResponse {
            request_id: id.to_string(),
            status: Some(ProviderState::InQueue),
        }));
    }

    pub fn push_status(&self, response: ProviderResult<StatusResponse>) {
        self.statuses.lock().unwrap().push_back(response);
    }

    pub fn push_state(&self, state: ProviderState) {
        self.push_status(Ok(StatusResponse::new(state)));
    }

    /// Make the next status call take `delay` before answering.
    pub fn delay_next_status(&self, delay: Duration) {
        self.status_delays.lock().unwrap().push_back(delay);
    }

    pub fn push_result(&self, response: ProviderResult<Value>) {
        self.results.lock().unwrap().push_back(response);
    }

    pub fn submit_calls(&self) -> u32 {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn result_calls(&self) -> u32 {
        self.result_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    async fn submit(&self, _provider: &str, _params: &Value) -> ProviderResult<SubmitResponse> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        self.submits.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(SubmitResponse {
                request_id: "p1".to_string(),
                status: Some(ProviderState::InQueue),
            })
        })
    }

    async fn status(&self, _provider: &str, _request_id: &str) -> ProviderResult<StatusResponse> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.status_delays.lock().unwrap().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(StatusResponse::new(ProviderState::InProgress)))
    }

    async fn result(&self, _provider: &str, _request_id: &str) -> ProviderResult<Value> {
        self.result_calls.fetch_add(1, Ordering::SeqCst);
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Value::Null))
    }
}

/// Notifier that records every call.
#[derive(Default)]
pub struct RecordingNotifier {
    created: Mutex<Vec<CreateNotification>>,
    updates: Mutex<Vec<(String, NotificationUpdate)>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn created(&self) -> Vec<CreateNotification> {
        self.created.lock().unwrap().clone()
    }

    pub fn updates(&self) -> Vec<(String, NotificationUpdate)> {
        self.updates.lock().unwrap().clone()
    }

    fn check(&self) -> ServiceResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ServiceError::RequestFailed {
                service: "notifications",
                status: 503,
                body: String::new(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn create(&self, notification: &CreateNotification) -> ServiceResult<String> {
        self.check()?;
        let mut created = self.created.lock().unwrap();
        created.push(notification.clone());
        Ok(format!("n-{}", created.len()))
    }

    async fn update(&self, id: &str, update: &NotificationUpdate) -> ServiceResult<()> {
        self.check()?;
        self.updates
            .lock()
            .unwrap()
            .push((id.to_string(), update.clone()));
        Ok(())
    }
}

/// Persistence collaborator that records every save.
#[derive(Default)]
pub struct RecordingPersistence {
    saved: Mutex<Vec<SaveVideoRequest>>,
    failing: AtomicBool,
}

impl RecordingPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn saved(&self) -> Vec<SaveVideoRequest> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl AssetPersistence for RecordingPersistence {
    async fn save_video_from_url(&self, request: &SaveVideoRequest) -> ServiceResult<SavedVideo> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ServiceError::RequestFailed {
                service: "persistence",
                status: 500,
                body: "disk full".to_string(),
            });
        }
        self.saved.lock().unwrap().push(request.clone());
        Ok(SavedVideo {
            id: "v1".to_string(),
            name: request.video_name.clone(),
            url: request.video_url.clone(),
            created_at: Utc::now(),
        })
    }
}
