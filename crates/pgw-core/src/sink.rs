//! Downstream consumers of applied entity bodies.
//!
//! The update pipeline pushes every successfully fetched entity body into
//! an [`EntitySink`] before the version registry is repointed. The
//! in-tree [`AccessControlRegistry`] is the companion access-control store
//! used by the gateway; tests and embedders may provide their own sink.

use crate::entity::{EntityBody, EntityIdentity};
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors raised by sink operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// The sink refused the entity (schema/content problem).
    #[error("entity rejected by sink: {0}")]
    Rejected(String),
    /// The sink is temporarily unable to accept writes.
    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

/// A downstream store keyed by entity identity.
///
/// Operations are side-effecting and must be safe to call from the single
/// update pipeline; implementations are free to fan out further.
#[async_trait]
pub trait EntitySink: Send + Sync + 'static {
    /// Installs an entity not previously present.
    async fn add(&self, identity: &EntityIdentity, body: &EntityBody) -> Result<(), SinkError>;

    /// Replaces the stored body for a logical entity.
    async fn update(&self, identity: &EntityIdentity, body: &EntityBody) -> Result<(), SinkError>;

    /// Removes a logical entity. Removing an absent entity is a no-op.
    async fn delete(&self, identity: &EntityIdentity) -> Result<(), SinkError>;
}

/// In-memory access-control store.
///
/// Holds the most recently applied body per logical entity (short name).
/// Reads are exposed for the gateway's enforcement path and for tests.
#[derive(Debug, Default)]
pub struct AccessControlRegistry {
    entries: RwLock<HashMap<String, (EntityIdentity, EntityBody)>>,
}

impl AccessControlRegistry {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored body for a logical entity.
    pub async fn get(&self, short_name: &str) -> Option<EntityBody> {
        let entries = self.entries.read().await;
        entries.get(short_name).map(|(_, body)| body.clone())
    }

    /// Returns the identity whose body is currently stored.
    pub async fn identity_of(&self, short_name: &str) -> Option<EntityIdentity> {
        let entries = self.entries.read().await;
        entries.get(short_name).map(|(identity, _)| identity.clone())
    }

    /// Returns `true` if a body is stored for the logical entity.
    pub async fn contains(&self, short_name: &str) -> bool {
        self.entries.read().await.contains_key(short_name)
    }

    /// Number of stored entities.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns `true` if the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl EntitySink for AccessControlRegistry {
    async fn add(&self, identity: &EntityIdentity, body: &EntityBody) -> Result<(), SinkError> {
        let mut entries = self.entries.write().await;
        entries.insert(
            identity.short_name.clone(),
            (identity.clone(), body.clone()),
        );
        Ok(())
    }

    async fn update(&self, identity: &EntityIdentity, body: &EntityBody) -> Result<(), SinkError> {
        // Same upsert semantics as add: the pipeline decides which
        // operation to issue based on its loaded-entity map.
        self.add(identity, body).await
    }

    async fn delete(&self, identity: &EntityIdentity) -> Result<(), SinkError> {
        let mut entries = self.entries.write().await;
        entries.remove(&identity.short_name);
        Ok(())
    }
}
