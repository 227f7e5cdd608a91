//! Audit trail for the live-update pipeline.
//!
//! Every applied update, unload, failed load attempt, and stream
//! termination is recorded here for compliance and post-incident review.
//! Recording is infallible and never influences pipeline control flow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// An entry in the update audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry ID.
    pub id: Uuid,
    /// Timestamp.
    pub timestamp: DateTime<Utc>,
    /// The audited event.
    pub event: AuditEvent,
}

/// Events recorded by the update pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    /// An entity version was applied.
    EntityUpdated {
        /// Change kind (add/update).
        change: String,
        /// Patch-qualified entity location.
        entity: String,
    },
    /// An entity was unloaded.
    EntityUnloaded {
        /// Patch-qualified entity location.
        entity: String,
    },
    /// One load attempt for an entity version failed.
    LoadFailed {
        /// Change kind being applied.
        change: String,
        /// Patch-qualified entity location.
        entity: String,
        /// Failure cause.
        cause: String,
    },
    /// The delta stream reached a terminal event.
    StreamTerminated {
        /// Why the stream ended.
        reason: String,
    },
}

/// Bounded in-memory audit log, optionally mirrored to tracing.
pub struct AuditLog {
    entries: Arc<RwLock<VecDeque<AuditEntry>>>,
    max_entries: usize,
    log_to_tracing: bool,
}

impl AuditLog {
    /// Creates a new audit log.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(VecDeque::with_capacity(max_entries))),
            max_entries,
            log_to_tracing: true,
        }
    }

    /// Creates an audit log without tracing output.
    pub fn without_tracing(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(VecDeque::with_capacity(max_entries))),
            max_entries,
            log_to_tracing: false,
        }
    }

    /// Records an applied update.
    pub async fn record_update(&self, change: &str, entity: &str) {
        self.record(AuditEvent::EntityUpdated {
            change: change.to_string(),
            entity: entity.to_string(),
        })
        .await;
    }

    /// Records an unloaded entity.
    pub async fn record_unload(&self, entity: &str) {
        self.record(AuditEvent::EntityUnloaded {
            entity: entity.to_string(),
        })
        .await;
    }

    /// Records one failed load attempt.
    pub async fn record_load_failure(&self, change: &str, entity: &str, cause: &str) {
        self.record(AuditEvent::LoadFailed {
            change: change.to_string(),
            entity: entity.to_string(),
            cause: cause.to_string(),
        })
        .await;
    }

    /// Records a terminal stream event.
    pub async fn record_termination(&self, reason: &str) {
        self.record(AuditEvent::StreamTerminated {
            reason: reason.to_string(),
        })
        .await;
    }

    async fn record(&self, event: AuditEvent) {
        if self.log_to_tracing {
            info!(event = ?event, "Audit");
        }

        let entry = AuditEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        };

        let mut entries = self.entries.write().await;
        if entries.len() >= self.max_entries {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Gets all entries.
    pub async fn entries(&self) -> Vec<AuditEntry> {
        let entries = self.entries.read().await;
        entries.iter().cloned().collect()
    }

    /// Gets the recorded load failures.
    pub async fn load_failures(&self) -> Vec<AuditEntry> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|e| matches!(e.event, AuditEvent::LoadFailed { .. }))
            .cloned()
            .collect()
    }

    /// Gets the recorded stream terminations.
    pub async fn terminations(&self) -> Vec<AuditEntry> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|e| matches!(e.event, AuditEvent::StreamTerminated { .. }))
            .cloned()
            .collect()
    }

    /// Exports entries as JSON.
    pub async fn export_json(&self) -> String {
        let entries = self.entries().await;
        serde_json::to_string_pretty(&entries).unwrap_or_else(|_| "[]".to_string())
    }

    /// Gets the number of entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Checks if the audit log is empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Clears all entries.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(10000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_update() {
        let audit = AuditLog::without_tracing(100);

        audit.record_update("add", "lob/bu/limits/1.0.1").await;

        let entries = audit.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].event,
            AuditEvent::EntityUpdated {
                change: "add".to_string(),
                entity: "lob/bu/limits/1.0.1".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_filters() {
        let audit = AuditLog::without_tracing(100);

        audit.record_update("add", "a/b/c/1.0.1").await;
        audit
            .record_load_failure("update", "a/b/c/1.0.2", "fetch failed")
            .await;
        audit.record_termination("connection reset").await;
        audit.record_unload("a/b/c/1.0.2").await;

        assert_eq!(audit.load_failures().await.len(), 1);
        assert_eq!(audit.terminations().await.len(), 1);
        assert_eq!(audit.len().await, 4);
    }

    #[tokio::test]
    async fn test_bounded_eviction() {
        let audit = AuditLog::without_tracing(3);

        for i in 0..5 {
            audit.record_update("add", &format!("a/b/c/1.0.{}", i)).await;
        }

        assert_eq!(audit.len().await, 3);
        let entries = audit.entries().await;
        assert!(matches!(
            &entries[0].event,
            AuditEvent::EntityUpdated { entity, .. } if entity == "a/b/c/1.0.2"
        ));
    }

    #[tokio::test]
    async fn test_export_json() {
        let audit = AuditLog::without_tracing(10);
        audit.record_termination("shutdown").await;

        let json = audit.export_json().await;
        assert!(json.contains("stream_terminated"));
        assert!(json.contains("shutdown"));
    }
}
