//! Shared data models for the video generation pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Generation requests and request IDs
//! - Job status records and cached results
//! - Recurring poll jobs
//! - Notification feed payloads
//! - Submission history entries

pub mod history;
pub mod notification;
pub mod poll_job;
pub mod request;
pub mod status;

// Re-export common types
pub use history::{SubmissionOutcome, SubmissionRecord};
pub use notification::{CreateNotification, NotificationStatus, NotificationUpdate};
pub use poll_job::PollJob;
pub use request::{prompt_from_params, RequestId, VideoRequest};
pub use status::{CachedResult, ProviderMapping, VideoState, VideoStatus};
