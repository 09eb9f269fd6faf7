//! Axum HTTP API server.
//!
//! This crate provides:
//! - Intake of video generation requests into the submission queue
//! - Status lookup by internal or provider request ID
//! - Health/readiness probes and Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::{AppState, SubmissionQueue};
