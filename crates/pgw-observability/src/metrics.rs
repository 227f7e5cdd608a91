//! Metrics collection for the update pipeline.
//!
//! Uses the `metrics` facade crate; without an installed recorder every
//! call is a no-op, so the pipeline records unconditionally and the host
//! service decides whether to export.

use metrics::{counter, describe_counter, describe_gauge, gauge};

/// Metric recorder for the update pipeline.
#[derive(Debug, Clone, Default)]
pub struct UpdateMetrics;

impl UpdateMetrics {
    /// Creates the recorder and registers metric descriptions.
    pub fn new() -> Self {
        describe_counter!(
            "pgw_updates_applied_total",
            "Entity versions successfully applied"
        );
        describe_counter!(
            "pgw_load_failures_total",
            "Failed entity load attempts, including fallback attempts"
        );
        describe_counter!(
            "pgw_batches_failed_total",
            "Delta batches that accumulated at least one failure"
        );
        describe_counter!(
            "pgw_stream_retries_total",
            "Delta-stream resubscription attempts"
        );
        describe_gauge!(
            "pgw_entities_loaded",
            "Logical entities currently loaded"
        );
        Self
    }

    /// Records one successfully applied entity version.
    pub fn record_applied(&self) {
        counter!("pgw_updates_applied_total").increment(1);
    }

    /// Records one failed load attempt.
    pub fn record_load_failure(&self) {
        counter!("pgw_load_failures_total").increment(1);
    }

    /// Records a batch that finished with failures.
    pub fn record_batch_failed(&self) {
        counter!("pgw_batches_failed_total").increment(1);
    }

    /// Records a stream resubscription attempt.
    pub fn record_stream_retry(&self) {
        counter!("pgw_stream_retries_total").increment(1);
    }

    /// Records the number of currently loaded logical entities.
    pub fn record_loaded(&self, count: usize) {
        gauge!("pgw_entities_loaded").set(count as f64);
    }
}
