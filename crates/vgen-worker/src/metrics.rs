//! Worker metrics.

use metrics::{counter, gauge};

/// Metric name constants for consistency.
pub mod names {
    /// Submission attempts by outcome.
    pub const SUBMISSIONS_TOTAL: &str = "vgen_submissions_total";

    /// Poll iterations by outcome.
    pub const POLLS_TOTAL: &str = "vgen_polls_total";

    /// Jobs that reached the completed state.
    pub const JOBS_COMPLETED_TOTAL: &str = "vgen_jobs_completed_total";

    /// Jobs that reached the failed state, by reason.
    pub const JOBS_FAILED_TOTAL: &str = "vgen_jobs_failed_total";

    /// Messages waiting in the submission stream.
    pub const QUEUE_DEPTH: &str = "vgen_queue_depth";

    /// Messages in the dead letter stream.
    pub const DLQ_DEPTH: &str = "vgen_dlq_depth";

    /// Registered poll jobs.
    pub const ACTIVE_POLLS: &str = "vgen_active_polls";
}

pub fn record_submission(outcome: &'static str) {
    counter!(names::SUBMISSIONS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_poll(outcome: &'static str) {
    counter!(names::POLLS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_completed() {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
}

pub fn record_failed(reason: &'static str) {
    counter!(names::JOBS_FAILED_TOTAL, "reason" => reason).increment(1);
}

pub fn set_queue_depths(queue: u64, dlq: u64, active_polls: u64) {
    gauge!(names::QUEUE_DEPTH).set(queue as f64);
    gauge!(names::DLQ_DEPTH).set(dlq as f64);
    gauge!(names::ACTIVE_POLLS).set(active_polls as f64);
}
