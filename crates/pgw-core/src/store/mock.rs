//! Mock config store for tests and local development.

use super::{ConfigStoreClient, ConfigStoreError, DeltaSubscription, StreamEvent};
use crate::entity::{DeltaBatch, EntityBody, EntityInfo, EntityKind};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{mpsc, RwLock};

/// Buffered events per subscription before senders block.
const SUBSCRIPTION_BUFFER: usize = 64;

/// An in-memory [`ConfigStoreClient`] with scripted failures.
///
/// Entities registered with [`add_entity`](Self::add_entity) are returned
/// by enumeration, and a body is synthesized for every version in the
/// prior chain so fallback walks can fetch older versions. Individual
/// versions can be made to fail fetching, and the delta stream can be
/// driven (and broken) explicitly:
///
/// ```ignore
/// let store = MockConfigStore::new();
/// store.add_entity(info.clone()).await;
/// store.fail_entity(&info).await;                  // get_entity now errors
/// store.push_batch(DeltaBatch::new(deltas)).await; // deliver a batch
/// store.fail_stream("connection reset").await;     // subscribers must resubscribe
/// ```
#[derive(Debug, Default)]
pub struct MockConfigStore {
    entities: RwLock<Vec<EntityInfo>>,
    bodies: RwLock<HashMap<String, EntityBody>>,
    failing: RwLock<HashMap<String, String>>,
    senders: RwLock<Vec<mpsc::Sender<StreamEvent>>>,
    cursors: RwLock<Vec<Vec<EntityInfo>>>,
    subscribe_count: AtomicUsize,
}

impl MockConfigStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entity for enumeration and synthesizes bodies for
    /// every version in its prior chain.
    pub async fn add_entity(&self, info: EntityInfo) {
        {
            let mut bodies = self.bodies.write().await;
            let mut cursor = Some(&info);
            while let Some(version) = cursor {
                bodies
                    .entry(version.identity.to_string())
                    .or_insert_with(|| {
                        EntityBody::new(serde_json::json!({
                            "path": version.identity.to_string(),
                            "status": version.status,
                        }))
                    });
                cursor = version.prior.as_deref();
            }
        }
        self.entities.write().await.push(info);
    }

    /// Replaces the enumeration listing wholesale.
    pub async fn set_entities(&self, entities: Vec<EntityInfo>) {
        *self.entities.write().await = Vec::new();
        for info in entities {
            self.add_entity(info).await;
        }
    }

    /// Overrides the body served for one version.
    pub async fn set_body(&self, info: &EntityInfo, body: EntityBody) {
        self.bodies
            .write()
            .await
            .insert(info.identity.to_string(), body);
    }

    /// Makes `get_entity` fail for one version with a generic cause.
    pub async fn fail_entity(&self, info: &EntityInfo) {
        self.fail_entity_with(info, "connection reset by config store")
            .await;
    }

    /// Makes `get_entity` fail for one version with a scripted cause.
    pub async fn fail_entity_with(&self, info: &EntityInfo, message: &str) {
        self.failing
            .write()
            .await
            .insert(info.identity.to_string(), message.to_string());
    }

    /// Clears a scripted fetch failure.
    pub async fn heal_entity(&self, info: &EntityInfo) {
        self.failing.write().await.remove(&info.identity.to_string());
    }

    /// Delivers a batch to every live subscriber.
    pub async fn push_batch(&self, batch: DeltaBatch) {
        let senders = self.senders.read().await;
        for sender in senders.iter() {
            let _ = sender.send(Ok(batch.clone())).await;
        }
    }

    /// Fails the stream for every live subscriber and drops them; the
    /// next batch is only seen by fresh subscriptions.
    pub async fn fail_stream(&self, message: &str) {
        let mut senders = self.senders.write().await;
        for sender in senders.drain(..) {
            let _ = sender
                .send(Err(ConfigStoreError::Connection(message.to_string())))
                .await;
        }
    }

    /// Closes the stream for every live subscriber without an error.
    pub async fn close_stream(&self) {
        self.senders.write().await.clear();
    }

    /// Number of `subscribe_updates` calls observed.
    pub fn subscriptions_opened(&self) -> usize {
        self.subscribe_count.load(Ordering::SeqCst)
    }

    /// Cursors passed to each `subscribe_updates` call, in order.
    pub async fn cursors(&self) -> Vec<Vec<EntityInfo>> {
        self.cursors.read().await.clone()
    }
}

#[async_trait]
impl ConfigStoreClient for MockConfigStore {
    async fn get_entity_info(&self, _kind: EntityKind) -> Result<Vec<EntityInfo>, ConfigStoreError> {
        Ok(self.entities.read().await.clone())
    }

    async fn get_entity(&self, info: &EntityInfo) -> Result<EntityBody, ConfigStoreError> {
        let key = info.identity.to_string();
        if let Some(message) = self.failing.read().await.get(&key) {
            return Err(ConfigStoreError::Connection(message.clone()));
        }
        let bodies = self.bodies.read().await;
        bodies
            .get(&key)
            .cloned()
            .ok_or(ConfigStoreError::NotFound(key))
    }

    async fn subscribe_updates(
        &self,
        currently_loaded: Vec<EntityInfo>,
        _kind: EntityKind,
    ) -> Result<DeltaSubscription, ConfigStoreError> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.senders.write().await.push(tx);
        self.cursors.write().await.push(currently_loaded);
        self.subscribe_count.fetch_add(1, Ordering::SeqCst);
        Ok(DeltaSubscription::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{ActivationStatus, ChangeType, Delta, EntityIdentity, EntityVersion};

    fn info(family: &str, patch: u32) -> EntityInfo {
        EntityInfo::new(
            EntityIdentity::new(family, EntityVersion::new(1, 0, patch)),
            ActivationStatus::Active,
        )
    }

    #[tokio::test]
    async fn test_enumeration_and_bodies() {
        let store = MockConfigStore::new();
        let announced = info("a/b/c", 2).with_prior(info("a/b/c", 1));
        store.add_entity(announced.clone()).await;

        let listed = store.get_entity_info(EntityKind::Policy).await.unwrap();
        assert_eq!(listed, vec![announced.clone()]);

        // Bodies exist for the announced version and its prior.
        assert!(store.get_entity(&announced).await.is_ok());
        assert!(store.get_entity(&info("a/b/c", 1)).await.is_ok());
        assert!(matches!(
            store.get_entity(&info("a/b/x", 1)).await,
            Err(ConfigStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_scripted_fetch_failure_and_heal() {
        let store = MockConfigStore::new();
        let announced = info("a/b/c", 1);
        store.add_entity(announced.clone()).await;

        store.fail_entity(&announced).await;
        assert!(matches!(
            store.get_entity(&announced).await,
            Err(ConfigStoreError::Connection(_))
        ));

        store.heal_entity(&announced).await;
        assert!(store.get_entity(&announced).await.is_ok());
    }

    #[tokio::test]
    async fn test_stream_delivery_and_failure() {
        let store = MockConfigStore::new();
        let mut sub = store
            .subscribe_updates(Vec::new(), EntityKind::Policy)
            .await
            .unwrap();

        let batch = DeltaBatch::new(vec![Delta::new(ChangeType::Add, info("a/b/c", 1))]);
        store.push_batch(batch.clone()).await;
        assert_eq!(sub.recv().await, Some(Ok(batch)));

        store.fail_stream("reset").await;
        assert!(matches!(
            sub.recv().await,
            Some(Err(ConfigStoreError::Connection(_)))
        ));
        // Sender was dropped with the failure; the stream then ends.
        assert_eq!(sub.recv().await, None);

        assert_eq!(store.subscriptions_opened(), 1);
        assert_eq!(store.cursors().await, vec![Vec::new()]);
    }
}
