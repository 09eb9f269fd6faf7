//! Job status store.
//!
//! This crate provides:
//! - The `JobStore` abstraction (status records, provider mappings, result cache)
//! - A Redis implementation shared by every worker process
//! - An in-memory implementation for local runs and tests

pub mod error;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryJobStore;
pub use redis_store::{RedisJobStore, StoreConfig};
pub use store::{JobStore, DEFAULT_RESULT_TTL};
