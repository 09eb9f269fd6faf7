//! Provider call metrics.

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    /// Provider calls by operation and outcome.
    pub const REQUESTS_TOTAL: &str = "vgen_provider_requests_total";

    /// Provider call latency in seconds by operation.
    pub const LATENCY_SECONDS: &str = "vgen_provider_latency_seconds";
}

/// Record metrics for a completed provider call.
pub fn record_request(operation: &str, outcome: &str, latency_ms: f64) {
    counter!(
        names::REQUESTS_TOTAL,
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        names::LATENCY_SECONDS,
        "operation" => operation.to_string()
    )
    .record(latency_ms / 1000.0);
}
