//! Integration tests for the live-update pipeline.
//!
//! These tests drive the orchestrator, applier, registry, and
//! access-control sink together through the in-tree mock config store,
//! covering:
//! - Bootstrap followed by streamed adds, updates, and deletes
//! - The rollback guarantee: a broken new version never removes a
//!   previously-working version from availability
//! - Conflict containment inside a batch
//! - Stream failure, resubscription, and continued delivery
//!
//! # Running these tests
//!
//! ```bash
//! cargo test --package pgw-core --test live_update_tests
//! ```
//!
//! These tests use mock implementations and do not require external
//! services.

use std::sync::Arc;
use std::time::Duration;

use pgw_core::{
    AccessControlRegistry, ActivationStatus, ChangeType, ConfigStoreClient, Delta, DeltaBatch,
    EntityApplier, EntityIdentity, EntityInfo, EntitySink, EntityVersion, Environment,
    MockConfigStore, OrchestratorConfig, RetryPolicy, UpdateOrchestrator, VersionGate,
    VersionRegistry, VersionRequest,
};
use pgw_observability::AuditLog;

// ============================================================================
// Test Harness
// ============================================================================

struct Pipeline {
    orchestrator: Arc<UpdateOrchestrator>,
    registry: Arc<VersionRegistry>,
    store: Arc<MockConfigStore>,
    sink: Arc<AccessControlRegistry>,
    audit: Arc<AuditLog>,
}

fn pipeline(environment: Environment) -> Pipeline {
    let registry = Arc::new(VersionRegistry::new());
    let store = Arc::new(MockConfigStore::new());
    let sink = Arc::new(AccessControlRegistry::new());
    let audit = Arc::new(AuditLog::without_tracing(1000));

    let applier = Arc::new(EntityApplier::new(
        Arc::clone(&registry),
        Arc::clone(&store) as Arc<dyn ConfigStoreClient>,
        Arc::clone(&sink) as Arc<dyn EntitySink>,
        Arc::new(VersionGate::new(environment)),
    ));

    let config = OrchestratorConfig {
        retry: RetryPolicy::new(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(5))
            .with_jitter(0.0),
        ..Default::default()
    };
    let orchestrator = Arc::new(UpdateOrchestrator::new(
        applier,
        Arc::clone(&store) as Arc<dyn ConfigStoreClient>,
        Arc::clone(&audit),
        config,
    ));

    Pipeline {
        orchestrator,
        registry,
        store,
        sink,
        audit,
    }
}

fn entity(family: &str, major: u32, minor: u32, patch: u32) -> EntityInfo {
    EntityInfo::new(
        EntityIdentity::new(family, EntityVersion::new(major, minor, patch)),
        ActivationStatus::Active,
    )
}

fn request(s: &str) -> VersionRequest {
    s.parse().unwrap()
}

/// Polls a condition until it holds or the timeout elapses.
async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within timeout");
}

// ============================================================================
// Full Lifecycle
// ============================================================================

#[tokio::test]
async fn test_bootstrap_then_streamed_changes() {
    let p = pipeline(Environment::Development);

    p.store.add_entity(entity("lob/bu/limits", 1, 0, 1)).await;
    p.store.add_entity(entity("lob/bu/fraud", 2, 3, 0)).await;

    p.orchestrator.start().await.unwrap();
    let store = Arc::clone(&p.store);
    wait_until(move || store.subscriptions_opened() == 1).await;

    // Bootstrap state: both entities resolvable and present downstream.
    assert_eq!(
        p.registry.resolve("limits", request("1")),
        Some(entity("lob/bu/limits", 1, 0, 1).identity)
    );
    assert!(p.sink.contains("limits").await);
    assert!(p.sink.contains("fraud").await);

    // Stream an update and a new minor for limits.
    let limits_102 = entity("lob/bu/limits", 1, 0, 2);
    let limits_110 = entity("lob/bu/limits", 1, 1, 0);
    p.store.add_entity(limits_102.clone()).await;
    p.store.add_entity(limits_110.clone()).await;
    p.store
        .push_batch(DeltaBatch::new(vec![Delta::new(
            ChangeType::Update,
            limits_102,
        )]))
        .await;
    p.store
        .push_batch(DeltaBatch::new(vec![Delta::new(
            ChangeType::Update,
            limits_110.clone(),
        )]))
        .await;

    let registry = Arc::clone(&p.registry);
    let expected = limits_110.identity.clone();
    wait_until(move || registry.resolve("limits", request("1")).as_ref() == Some(&expected)).await;

    // The pinned older minor still resolves to its own patch.
    assert_eq!(
        p.registry.resolve("limits", request("1.0")),
        Some(entity("lob/bu/limits", 1, 0, 2).identity)
    );

    // Delete fraud through the stream.
    p.store
        .push_batch(DeltaBatch::new(vec![Delta::new(
            ChangeType::Delete,
            entity("lob/bu/fraud", 2, 3, 0),
        )]))
        .await;

    let registry = Arc::clone(&p.registry);
    wait_until(move || registry.resolve("fraud", request("2")).is_none()).await;
    assert!(!p.sink.contains("fraud").await);

    p.orchestrator.stop().await;
}

// ============================================================================
// Rollback Guarantee
// ============================================================================

#[tokio::test]
async fn test_broken_new_version_never_removes_working_one() {
    let p = pipeline(Environment::Development);

    let v1 = entity("lob/bu/limits", 1, 0, 1);
    p.store.add_entity(v1.clone()).await;
    p.orchestrator.start().await.unwrap();
    let store = Arc::clone(&p.store);
    wait_until(move || store.subscriptions_opened() == 1).await;

    let body_before = p.sink.get("limits").await.unwrap();

    // A broken v2 arrives, carrying v1 as its prior version.
    let v2 = entity("lob/bu/limits", 1, 0, 2).with_prior(v1.clone());
    p.store.add_entity(v2.clone()).await;
    p.store.fail_entity(&v2).await;
    p.store
        .push_batch(DeltaBatch::new(vec![Delta::new(ChangeType::Update, v2)]))
        .await;

    // Wait until the failed attempt has been audited.
    for _ in 0..200 {
        if p.audit.load_failures().await.len() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(p.audit.load_failures().await.len(), 1);

    // v1 still serves, both in resolution and downstream.
    assert_eq!(
        p.registry.resolve("limits", request("1")),
        Some(v1.identity)
    );
    assert_eq!(p.sink.get("limits").await, Some(body_before));

    p.orchestrator.stop().await;
}

// ============================================================================
// Conflict Containment
// ============================================================================

#[tokio::test]
async fn test_conflicting_entity_in_batch_is_contained() {
    let p = pipeline(Environment::Development);

    let original = entity("a/b/c", 1, 0, 1);
    p.store.add_entity(original.clone()).await;
    p.orchestrator.start().await.unwrap();

    // A different family claims the same short name inside a batch that
    // also carries a legitimate entity.
    let hijacker = entity("k/m/c", 1, 0, 1);
    let legitimate = entity("x/y/d", 1, 0, 1);
    p.store.add_entity(hijacker.clone()).await;
    p.store.add_entity(legitimate.clone()).await;

    let batch = DeltaBatch::new(vec![
        Delta::new(ChangeType::Add, hijacker),
        Delta::new(ChangeType::Add, legitimate.clone()),
    ]);
    let err = p.orchestrator.process_batch(&batch).await.unwrap_err();
    assert!(err.to_string().contains("1 failure"));

    // The original mapping survives; the legitimate delta applied.
    assert_eq!(
        p.registry.resolve("c", request("1")),
        Some(original.identity)
    );
    assert_eq!(
        p.registry.resolve("d", request("1")),
        Some(legitimate.identity)
    );

    p.orchestrator.stop().await;
}

// ============================================================================
// Stream Recovery
// ============================================================================

#[tokio::test]
async fn test_delivery_continues_after_stream_failure() {
    let p = pipeline(Environment::Development);
    p.orchestrator.start().await.unwrap();
    let store = Arc::clone(&p.store);
    wait_until(move || store.subscriptions_opened() == 1).await;

    p.store.fail_stream("connection reset").await;
    let store = Arc::clone(&p.store);
    wait_until(move || store.subscriptions_opened() == 2).await;

    // A batch pushed on the fresh subscription is applied normally.
    let late = entity("lob/bu/late", 1, 0, 1);
    p.store.add_entity(late.clone()).await;
    p.store
        .push_batch(DeltaBatch::new(vec![Delta::new(
            ChangeType::Add,
            late.clone(),
        )]))
        .await;

    let registry = Arc::clone(&p.registry);
    wait_until(move || registry.resolve("late", request("1")).is_some()).await;

    assert_eq!(p.audit.terminations().await.len(), 1);

    p.orchestrator.stop().await;
}
