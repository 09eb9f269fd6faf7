//! Provider client error types.

use thiserror::Error;

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Provider call failure, classified once at the client boundary.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider rejected credentials ({status}): {body}")]
    Unauthorized { status: u16, body: String },

    #[error("Provider request not found: {0}")]
    NotFound(String),

    #[error("Provider rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Unexpected provider response: {0}")]
    Unknown(String),

    #[error("Provider client misconfigured: {0}")]
    Config(String),
}

impl ProviderError {
    /// Map a non-success HTTP status to an error variant.
    pub fn from_http_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            401 | 403 => Self::Unauthorized { status, body },
            404 => Self::NotFound(body),
            _ => Self::Rejected { status, body },
        }
    }

    pub fn unknown(msg: impl Into<String>) -> Self {
        Self::Unknown(msg.into())
    }

    /// Errors that no amount of re-polling will fix.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProviderError::Unauthorized { .. } | ProviderError::NotFound(_) | ProviderError::Config(_)
        )
    }

    pub fn is_retryable(&self) -> bool {
        !self.is_fatal()
    }

    /// HTTP status code, if the error came from a response.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            ProviderError::Unauthorized { status, .. } | ProviderError::Rejected { status, .. } => {
                Some(*status)
            }
            ProviderError::NotFound(_) => Some(404),
            ProviderError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Unauthorized { .. } => "unauthorized",
            ProviderError::NotFound(_) => "not_found",
            ProviderError::Rejected { .. } => "rejected",
            ProviderError::Network(_) => "network",
            ProviderError::Unknown(_) => "unknown",
            ProviderError::Config(_) => "config",
        }
    }
}
