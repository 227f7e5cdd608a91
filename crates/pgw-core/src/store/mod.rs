//! Config-store collaborator boundary.
//!
//! The remote configuration store owns entity content, enumeration, and
//! the continuous stream of change batches. This module defines the
//! client trait the update pipeline consumes plus the subscription handle
//! it reads batches from; wire format and transport belong to the
//! implementation. [`MockConfigStore`] is the in-tree implementation used
//! by tests and local development.

mod error;
mod mock;

pub use error::ConfigStoreError;
pub use mock::MockConfigStore;

use crate::entity::{DeltaBatch, EntityBody, EntityInfo, EntityKind};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// One item delivered on a delta subscription: a batch, or the stream
/// reporting its own failure.
pub type StreamEvent = Result<DeltaBatch, ConfigStoreError>;

/// A live subscription to entity-change batches.
///
/// Receiving `Some(Ok(batch))` yields the next ordered batch; receiving
/// `Some(Err(_))` means the upstream stream failed and a fresh
/// subscription is required; `None` means the store closed the stream.
#[derive(Debug)]
pub struct DeltaSubscription {
    /// Channel of stream events, in delivery order.
    pub receiver: mpsc::Receiver<StreamEvent>,
}

impl DeltaSubscription {
    /// Wraps a receiver in a subscription handle.
    pub fn new(receiver: mpsc::Receiver<StreamEvent>) -> Self {
        Self { receiver }
    }

    /// Receives the next stream event.
    ///
    /// Returns `None` when the subscription is closed.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.receiver.recv().await
    }
}

/// Client for the remote configuration store.
#[async_trait]
pub trait ConfigStoreClient: Send + Sync + 'static {
    /// Enumerates every entity of the given kind. One-shot, used for the
    /// bootstrap load and for periodic resync sweeps.
    async fn get_entity_info(&self, kind: EntityKind) -> Result<Vec<EntityInfo>, ConfigStoreError>;

    /// Fetches the full body of one entity version.
    async fn get_entity(&self, info: &EntityInfo) -> Result<EntityBody, ConfigStoreError>;

    /// Opens a delta-batch subscription seeded with the caller's
    /// currently-loaded entities as the cursor.
    async fn subscribe_updates(
        &self,
        currently_loaded: Vec<EntityInfo>,
        kind: EntityKind,
    ) -> Result<DeltaSubscription, ConfigStoreError>;
}
