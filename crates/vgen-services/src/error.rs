//! Collaborator client errors.

use thiserror::Error;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{service} returned {status}: {body}")]
    RequestFailed {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("Invalid response from {service}: {message}")]
    InvalidResponse {
        service: &'static str,
        message: String,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl ServiceError {
    pub fn invalid_response(service: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            service,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::RequestFailed { status, .. } => *status == 429 || *status >= 500,
            ServiceError::Network(_) => true,
            ServiceError::InvalidResponse { .. } => false,
        }
    }
}

/// Turn a response into JSON, mapping failures to [`ServiceError`].
pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(
    service: &'static str,
    response: reqwest::Response,
) -> ServiceResult<T> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(ServiceError::RequestFailed {
            service,
            status: status.as_u16(),
            body,
        });
    }

    serde_json::from_str(&body).map_err(|e| ServiceError::invalid_response(service, e.to_string()))
}
