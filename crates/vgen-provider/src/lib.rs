//! Client for the generative video provider.
//!
//! The provider exposes a queue-style REST API: submit a generation, poll its
//! status, then fetch its result. Errors are classified into fatal and
//! transient variants here so callers never inspect raw HTTP responses.

pub mod client;
pub mod error;
pub mod metrics;
pub mod result;
pub mod types;

pub use client::{app_id, HttpProviderClient, ProviderConfig, ProviderClient};
pub use error::{ProviderError, ProviderResult};
pub use result::{extract_video_url, VideoUrlMatch, VIDEO_URL_ALIASES};
pub use types::{ProviderState, StatusResponse, SubmitResponse};
