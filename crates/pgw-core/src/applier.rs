//! Applies single entity changes to the registry and downstream stores.
//!
//! The applier is the failure-containment boundary of the update
//! pipeline: validation, fetch, and downstream failures are all returned
//! as values, never propagated as panics, so one bad entity can never
//! take down the update stream for every other entity.

use crate::entity::{ChangeType, EntityIdentity, EntityInfo};
use crate::registry::{RegistryError, VersionRegistry};
use crate::settings::Environment;
use crate::sink::{EntitySink, SinkError};
use crate::store::{ConfigStoreClient, ConfigStoreError};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// Errors produced while applying one entity change.
///
/// Always returned as a value from [`EntityApplier::apply`]; callers
/// decide whether to fall back to a prior version, count the failure, or
/// abort startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpdateError {
    /// A different path family already owns the entity's short name.
    #[error(transparent)]
    Conflict(#[from] RegistryError),

    /// The transition violates version governance for the environment.
    #[error("illegal update: {reason}")]
    IllegalUpdate {
        /// Why the transition was rejected.
        reason: String,
    },

    /// The config store could not supply the entity body.
    #[error("entity fetch failed: {message}")]
    Fetch {
        /// Underlying store error.
        message: String,
    },

    /// The downstream sink refused or failed the write.
    #[error("downstream apply failed: {message}")]
    Downstream {
        /// Underlying sink error.
        message: String,
    },
}

impl From<ConfigStoreError> for UpdateError {
    fn from(err: ConfigStoreError) -> Self {
        UpdateError::Fetch {
            message: err.to_string(),
        }
    }
}

impl From<SinkError> for UpdateError {
    fn from(err: SinkError) -> Self {
        UpdateError::Downstream {
            message: err.to_string(),
        }
    }
}

/// Validates a proposed transition before any side effects.
pub trait UpdateValidator: Send + Sync + 'static {
    /// Checks whether replacing `current` with `incoming` is legal.
    fn validate(
        &self,
        current: Option<&EntityIdentity>,
        incoming: &EntityIdentity,
        change: ChangeType,
    ) -> Result<(), UpdateError>;
}

/// Default validator enforcing the environment's version governance.
///
/// Outside development, re-announcing a loaded `major.minor` slot without
/// an incremented patch is rejected, and deletes are rejected wherever the
/// environment disallows them.
#[derive(Debug, Clone)]
pub struct VersionGate {
    environment: Environment,
}

impl VersionGate {
    /// Creates a gate for the given environment.
    pub fn new(environment: Environment) -> Self {
        Self { environment }
    }
}

impl UpdateValidator for VersionGate {
    fn validate(
        &self,
        current: Option<&EntityIdentity>,
        incoming: &EntityIdentity,
        change: ChangeType,
    ) -> Result<(), UpdateError> {
        match change {
            ChangeType::Add | ChangeType::Update => {
                if let Some(current) = current {
                    let same_slot = current.full_path == incoming.full_path;
                    if same_slot
                        && incoming.version.patch <= current.version.patch
                        && !self.environment.allows_version_overwrite()
                    {
                        return Err(UpdateError::IllegalUpdate {
                            reason: format!(
                                "{} is loaded at patch {}; patch {} does not increase it",
                                current.full_path, current.version.patch, incoming.version.patch
                            ),
                        });
                    }
                }
                Ok(())
            }
            ChangeType::Delete => {
                if !self.environment.allows_delete() {
                    return Err(UpdateError::IllegalUpdate {
                        reason: format!("delete is not permitted in {}", self.environment),
                    });
                }
                Ok(())
            }
        }
    }
}

/// Applies one change at a time against the registry and the downstream
/// sink, tracking the currently-loaded version of every logical entity.
pub struct EntityApplier {
    registry: Arc<VersionRegistry>,
    store: Arc<dyn ConfigStoreClient>,
    sink: Arc<dyn EntitySink>,
    validator: Arc<dyn UpdateValidator>,
    /// Loaded version per logical id; BTreeMap keeps the cursor sorted.
    loaded: RwLock<BTreeMap<String, EntityInfo>>,
}

impl EntityApplier {
    /// Creates an applier over the given collaborators.
    pub fn new(
        registry: Arc<VersionRegistry>,
        store: Arc<dyn ConfigStoreClient>,
        sink: Arc<dyn EntitySink>,
        validator: Arc<dyn UpdateValidator>,
    ) -> Self {
        Self {
            registry,
            store,
            sink,
            validator,
            loaded: RwLock::new(BTreeMap::new()),
        }
    }

    /// The registry this applier mutates.
    pub fn registry(&self) -> &Arc<VersionRegistry> {
        &self.registry
    }

    /// Applies one change, returning every failure as a value.
    #[instrument(skip(self, info), fields(entity = %info.identity, change = %change))]
    pub async fn apply(&self, info: &EntityInfo, change: ChangeType) -> Result<(), UpdateError> {
        let current = {
            let loaded = self.loaded.read().await;
            loaded.get(info.logical_id()).cloned()
        };

        match change {
            ChangeType::Add | ChangeType::Update => self.apply_upsert(info, current, change).await,
            ChangeType::Delete => self.apply_delete(info, current).await,
        }
    }

    /// Currently-loaded entities, sorted by logical id. Used as the
    /// delta-stream cursor.
    pub async fn currently_loaded(&self) -> Vec<EntityInfo> {
        self.loaded.read().await.values().cloned().collect()
    }

    /// The loaded identity for one logical entity, if any.
    pub async fn loaded_version(&self, short_name: &str) -> Option<EntityIdentity> {
        let loaded = self.loaded.read().await;
        loaded.get(short_name).map(|info| info.identity.clone())
    }

    async fn apply_upsert(
        &self,
        info: &EntityInfo,
        current: Option<EntityInfo>,
        change: ChangeType,
    ) -> Result<(), UpdateError> {
        self.validator
            .validate(current.as_ref().map(|c| &c.identity), &info.identity, change)?;
        // Conflicts are rejected before the fetch so a hijacking entity
        // never reaches the sink; `registry.set` re-checks under the
        // write lock.
        self.registry.ensure_claimable(&info.identity)?;

        let body = self.store.get_entity(info).await?;

        if current.is_some() {
            self.sink.update(&info.identity, &body).await?;
        } else {
            self.sink.add(&info.identity, &body).await?;
        }

        self.registry.set(&info.identity, info.status)?;
        self.loaded
            .write()
            .await
            .insert(info.logical_id().to_string(), info.clone());

        debug!(entity = %info.identity, status = %info.status, "Entity applied");
        Ok(())
    }

    async fn apply_delete(
        &self,
        info: &EntityInfo,
        current: Option<EntityInfo>,
    ) -> Result<(), UpdateError> {
        self.validator.validate(
            current.as_ref().map(|c| &c.identity),
            &info.identity,
            ChangeType::Delete,
        )?;

        // Deletion targets the loaded version, not the announced one, so
        // a stale announcement cannot orphan registry state.
        let target = current
            .map(|c| c.identity)
            .unwrap_or_else(|| info.identity.clone());

        self.sink.delete(&target).await?;
        self.registry.remove(&target);
        self.loaded.write().await.remove(&target.short_name);

        debug!(entity = %target, "Entity unloaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{ActivationStatus, EntityBody, EntityVersion, VersionRequest};
    use crate::sink::AccessControlRegistry;
    use crate::store::MockConfigStore;
    use async_trait::async_trait;

    fn info(family: &str, major: u32, minor: u32, patch: u32) -> EntityInfo {
        EntityInfo::new(
            EntityIdentity::new(family, EntityVersion::new(major, minor, patch)),
            ActivationStatus::Active,
        )
    }

    struct Harness {
        applier: EntityApplier,
        registry: Arc<VersionRegistry>,
        store: Arc<MockConfigStore>,
        sink: Arc<AccessControlRegistry>,
    }

    fn harness(environment: Environment) -> Harness {
        let registry = Arc::new(VersionRegistry::new());
        let store = Arc::new(MockConfigStore::new());
        let sink = Arc::new(AccessControlRegistry::new());
        let applier = EntityApplier::new(
            Arc::clone(&registry),
            Arc::clone(&store) as Arc<dyn ConfigStoreClient>,
            Arc::clone(&sink) as Arc<dyn EntitySink>,
            Arc::new(VersionGate::new(environment)),
        );
        Harness {
            applier,
            registry,
            store,
            sink,
        }
    }

    #[tokio::test]
    async fn test_add_flows_through_sink_registry_and_cursor() {
        let h = harness(Environment::Development);
        let announced = info("a/b/c", 1, 0, 1);
        h.store.add_entity(announced.clone()).await;

        h.applier.apply(&announced, ChangeType::Add).await.unwrap();

        assert!(h.sink.contains("c").await);
        assert_eq!(
            h.registry.resolve("c", VersionRequest::Major(1)),
            Some(announced.identity.clone())
        );
        assert_eq!(h.applier.currently_loaded().await, vec![announced]);
    }

    #[tokio::test]
    async fn test_same_version_overwrite_rejected_when_governed() {
        let h = harness(Environment::Staging);
        let announced = info("a/b/c", 1, 0, 1);
        h.store.add_entity(announced.clone()).await;
        h.applier.apply(&announced, ChangeType::Add).await.unwrap();

        let err = h
            .applier
            .apply(&announced, ChangeType::Update)
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateError::IllegalUpdate { .. }));

        // An incremented patch is accepted.
        let next = info("a/b/c", 1, 0, 2);
        h.store.add_entity(next.clone()).await;
        h.applier.apply(&next, ChangeType::Update).await.unwrap();
        assert_eq!(h.applier.loaded_version("c").await, Some(next.identity));
    }

    #[tokio::test]
    async fn test_same_version_overwrite_allowed_in_development() {
        let h = harness(Environment::Development);
        let announced = info("a/b/c", 1, 0, 1);
        h.store.add_entity(announced.clone()).await;

        h.applier.apply(&announced, ChangeType::Add).await.unwrap();
        h.applier
            .apply(&announced, ChangeType::Update)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_fetch_failure_is_contained_and_leaves_no_state() {
        let h = harness(Environment::Development);
        let announced = info("a/b/c", 1, 0, 1);
        h.store.add_entity(announced.clone()).await;
        h.store.fail_entity(&announced).await;

        let err = h
            .applier
            .apply(&announced, ChangeType::Add)
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateError::Fetch { .. }));

        assert!(h.registry.is_empty());
        assert!(h.sink.is_empty().await);
        assert!(h.applier.currently_loaded().await.is_empty());
    }

    #[tokio::test]
    async fn test_conflict_never_reaches_the_sink() {
        let h = harness(Environment::Development);
        let original = info("a/b/c", 1, 0, 1);
        let hijacker = info("k/m/c", 1, 0, 1);
        h.store.add_entity(original.clone()).await;
        h.store.add_entity(hijacker.clone()).await;

        h.applier.apply(&original, ChangeType::Add).await.unwrap();
        let original_body = h.sink.get("c").await.unwrap();

        let err = h
            .applier
            .apply(&hijacker, ChangeType::Update)
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateError::Conflict(_)));

        // The legitimate body and resolution are untouched.
        assert_eq!(h.sink.get("c").await, Some(original_body));
        assert_eq!(
            h.registry.resolve("c", VersionRequest::Major(1)),
            Some(original.identity)
        );
    }

    #[tokio::test]
    async fn test_delete_gated_in_production() {
        let h = harness(Environment::Production);
        let announced = info("a/b/c", 1, 0, 1);
        h.store.add_entity(announced.clone()).await;
        h.applier.apply(&announced, ChangeType::Add).await.unwrap();

        let err = h
            .applier
            .apply(&announced, ChangeType::Delete)
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateError::IllegalUpdate { .. }));
        assert!(h.sink.contains("c").await);
    }

    #[tokio::test]
    async fn test_delete_removes_loaded_entity() {
        let h = harness(Environment::Development);
        let announced = info("a/b/c", 1, 0, 1);
        h.store.add_entity(announced.clone()).await;
        h.applier.apply(&announced, ChangeType::Add).await.unwrap();

        h.applier
            .apply(&announced, ChangeType::Delete)
            .await
            .unwrap();

        assert!(h.registry.is_empty());
        assert!(h.sink.is_empty().await);
        assert_eq!(h.applier.loaded_version("c").await, None);
    }

    #[tokio::test]
    async fn test_delete_targets_loaded_version_not_announcement() {
        let h = harness(Environment::Development);
        let loaded = info("a/b/c", 1, 0, 1);
        h.store.add_entity(loaded.clone()).await;
        h.applier.apply(&loaded, ChangeType::Add).await.unwrap();

        // The delete announces a newer patch that was never applied.
        let stale_announcement = info("a/b/c", 1, 0, 5);
        h.applier
            .apply(&stale_announcement, ChangeType::Delete)
            .await
            .unwrap();

        assert!(h.registry.is_empty());
        assert_eq!(h.applier.loaded_version("c").await, None);
    }

    #[tokio::test]
    async fn test_cursor_sorted_by_logical_id() {
        let h = harness(Environment::Development);
        for family in ["x/y/zeta", "a/b/alpha", "m/n/mid"] {
            let announced = info(family, 1, 0, 1);
            h.store.add_entity(announced.clone()).await;
            h.applier.apply(&announced, ChangeType::Add).await.unwrap();
        }

        let cursor: Vec<String> = h
            .applier
            .currently_loaded()
            .await
            .iter()
            .map(|i| i.identity.short_name.clone())
            .collect();
        assert_eq!(cursor, vec!["alpha", "mid", "zeta"]);
    }

    struct RejectingSink;

    #[async_trait]
    impl EntitySink for RejectingSink {
        async fn add(&self, _: &EntityIdentity, _: &EntityBody) -> Result<(), SinkError> {
            Err(SinkError::Rejected("schema mismatch".to_string()))
        }

        async fn update(&self, _: &EntityIdentity, _: &EntityBody) -> Result<(), SinkError> {
            Err(SinkError::Rejected("schema mismatch".to_string()))
        }

        async fn delete(&self, _: &EntityIdentity) -> Result<(), SinkError> {
            Err(SinkError::Unavailable("down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_downstream_failure_is_contained() {
        let registry = Arc::new(VersionRegistry::new());
        let store = Arc::new(MockConfigStore::new());
        let applier = EntityApplier::new(
            Arc::clone(&registry),
            Arc::clone(&store) as Arc<dyn ConfigStoreClient>,
            Arc::new(RejectingSink),
            Arc::new(VersionGate::new(Environment::Development)),
        );

        let announced = info("a/b/c", 1, 0, 1);
        store.add_entity(announced.clone()).await;

        let err = applier.apply(&announced, ChangeType::Add).await.unwrap_err();
        assert!(matches!(err, UpdateError::Downstream { .. }));
        assert!(registry.is_empty());
        assert!(applier.currently_loaded().await.is_empty());
    }
}
