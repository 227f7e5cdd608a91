//! # pgw-observability
//!
//! Logging, metrics, and audit infrastructure for Policy Gateway.
//!
//! This crate provides structured logging with tracing, metric counters
//! for the update pipeline, and the audit trail recording every update,
//! unload, failed load attempt, and stream termination.

pub mod audit;
pub mod logging;
pub mod metrics;

pub use audit::{AuditEntry, AuditEvent, AuditLog};
pub use logging::{init_logging, init_logging_with_config, LoggingConfig};
pub use metrics::UpdateMetrics;
