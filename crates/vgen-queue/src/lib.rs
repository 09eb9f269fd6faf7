//! Redis-backed job plumbing for the video pipeline.
//!
//! This crate provides:
//! - The submission queue on Redis Streams (dedup, DLQ, stalled-message claim)
//! - The poll registry scanned by the global poll ticker
//! - A bounded history of submission outcomes

pub mod error;
pub mod job;
pub mod poll_registry;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use job::{QueueJob, SubmitVideoJob};
pub use poll_registry::{
    MemoryPollRegistry, PollRegistry, PollRegistryConfig, RedisPollRegistry, DEFAULT_CLAIM_LEASE,
};
pub use queue::{JobQueue, QueueConfig};
