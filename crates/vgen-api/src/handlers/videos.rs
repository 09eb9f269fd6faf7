//! Video generation request handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use validator::Validate;

use vgen_models::{RequestId, VideoRequest, VideoState, VideoStatus};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Body of `POST /api/videos`.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateVideoRequest {
    /// Caller-chosen request ID; generated when absent
    #[validate(length(min = 1, max = 128))]
    pub id: Option<String>,
    /// Provider endpoint identifier
    #[validate(length(min = 1, max = 256))]
    pub provider: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[validate(length(min = 1, max = 128))]
    pub user_id: Option<String>,
    #[validate(length(min = 1, max = 128))]
    pub notification_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateVideoResponse {
    pub request_id: String,
    pub status: VideoState,
}

/// Status of a generation request.
#[derive(Debug, Serialize, Deserialize)]
pub struct VideoStatusResponse {
    pub request_id: String,
    pub status: VideoState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// True when served from the result cache
    pub cached: bool,
    pub updated_at: String,
}

impl From<VideoStatus> for VideoStatusResponse {
    fn from(status: VideoStatus) -> Self {
        Self {
            request_id: status.request_id.to_string(),
            status: status.status,
            provider_request_id: status.provider_request_id.clone(),
            video_url: status.video_url().map(str::to_string),
            result: status.result,
            error: status.error,
            cached: false,
            updated_at: status.updated_at.to_rfc3339(),
        }
    }
}

fn is_valid_provider(provider: &str) -> bool {
    !provider.starts_with('/')
        && !provider.ends_with('/')
        && !provider.contains("//")
        && !provider.split('/').any(|segment| segment == "." || segment == "..")
        && provider
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | '.'))
}

/// Accept a generation request and queue it for submission.
pub async fn create_video(
    State(state): State<AppState>,
    Json(body): Json<CreateVideoRequest>,
) -> ApiResult<(StatusCode, Json<CreateVideoResponse>)> {
    body.validate()?;
    if !is_valid_provider(&body.provider) {
        return Err(ApiError::bad_request("Invalid provider identifier"));
    }
    if !(body.params.is_object() || body.params.is_null()) {
        return Err(ApiError::bad_request("params must be a JSON object"));
    }

    let id = body
        .id
        .map(RequestId::from_string)
        .unwrap_or_default();

    if state.store.get_status(&id).await?.is_some() {
        return Err(ApiError::Conflict(format!("request {} already exists", id)));
    }

    let mut request = VideoRequest::with_id(id.clone(), body.provider, body.params);
    request.user_id = body.user_id;
    request.notification_id = body.notification_id;

    state
        .store
        .put_status(
            &VideoStatus::pending(id.clone()).with_notification_id(request.notification_id.clone()),
        )
        .await?;

    let message_id = match state.queue.enqueue_submission(request).await {
        Ok(message_id) => message_id,
        Err(e) => {
            warn!(request_id = %id, "Failed to enqueue submission: {}", e);
            let failed = VideoStatus::failed(id.clone(), "Could not queue the request");
            if let Err(store_err) = state.store.put_status(&failed).await {
                warn!(request_id = %id, "Failed to record enqueue failure: {}", store_err);
            }
            return Err(e.into());
        }
    };

    metrics::record_submission_enqueued();
    info!(request_id = %id, message_id = %message_id, "Accepted generation request");

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateVideoResponse {
            request_id: id.to_string(),
            status: VideoState::Pending,
        }),
    ))
}

/// Current status of a request. The result cache wins over the status record.
pub async fn get_video(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> ApiResult<Json<VideoStatusResponse>> {
    let id = RequestId::from_string(request_id);

    if let Some(cached) = state.store.get_cached_result(&id).await? {
        let video_url = cached
            .result
            .as_ref()
            .and_then(|r| r.get("video_url"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let provider_request_id = state
            .store
            .get_status(&id)
            .await?
            .and_then(|s| s.provider_request_id);
        return Ok(Json(VideoStatusResponse {
            request_id: cached.request_id.to_string(),
            status: cached.status,
            provider_request_id,
            video_url,
            result: cached.result,
            error: cached.error,
            cached: true,
            updated_at: cached.cached_at.to_rfc3339(),
        }));
    }

    let status = state
        .store
        .get_status(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("Request not found"))?;

    Ok(Json(status.into()))
}

/// Status of a request looked up by the provider's request ID.
pub async fn get_video_by_provider(
    State(state): State<AppState>,
    Path(provider_request_id): Path<String>,
) -> ApiResult<Json<VideoStatusResponse>> {
    let id = state
        .store
        .resolve_internal_id(&provider_request_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Provider request not found"))?;

    get_video(State(state), Path(id.to_string())).await
}
