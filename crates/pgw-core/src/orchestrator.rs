//! Live-update orchestrator for the version registry.
//!
//! The orchestrator owns the two phases of keeping the registry
//! consistent with the config store:
//!
//! 1. **Bootstrap**: a one-time full load at startup, run synchronously
//!    on the calling task. Entities that fail to load fall back through
//!    their prior-version chain; remaining failures either abort startup
//!    (strict mode) or are tolerated in favor of partial availability.
//! 2. **Streaming**: a single long-lived background task consuming
//!    ordered delta batches. Entity-level failures are contained per
//!    delta; stream-level failures trigger resubscription with
//!    exponential backoff and jitter, effectively forever.
//!
//! The central guarantee is that a newly published version that fails to
//! load never removes a previously-working version from availability:
//! the registry degrades to the last-known-good version instead of going
//! dark.

use crate::applier::{EntityApplier, UpdateError};
use crate::entity::{ChangeType, DeltaBatch, EntityInfo, EntityKind};
use crate::retry::RetryPolicy;
use crate::settings::GatewaySettings;
use crate::store::{ConfigStoreClient, ConfigStoreError};
use pgw_observability::{AuditLog, UpdateMetrics};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

/// Errors raised by the orchestrator.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Bootstrap accumulated failures while strict startup is enabled.
    #[error("startup failed: {failures} entity(ies) could not be loaded")]
    Startup {
        /// Logical entities whose version chain was exhausted.
        failures: usize,
    },

    /// A delta batch finished with at least one exhausted entity.
    #[error("delta batch completed with {failures} failure(s)")]
    Batch {
        /// Distinct failures accumulated across the batch.
        failures: usize,
    },

    /// The config store failed a one-shot call.
    #[error("config store error: {0}")]
    Store(#[from] ConfigStoreError),
}

/// Configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Entity kind this orchestrator manages.
    pub kind: EntityKind,
    /// Abort startup if any entity fails to load.
    pub strict_startup: bool,
    /// Backoff policy for stream resubscription.
    pub retry: RetryPolicy,
    /// Interval between resync sweeps; `None` disables them.
    pub resync_interval: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            kind: EntityKind::Policy,
            strict_startup: false,
            retry: RetryPolicy::default(),
            resync_interval: None,
        }
    }
}

impl OrchestratorConfig {
    /// Builds the configuration from loaded gateway settings.
    pub fn from_settings(settings: &GatewaySettings, kind: EntityKind) -> Self {
        Self {
            kind,
            strict_startup: settings.strict_startup,
            retry: settings.retry_policy(),
            resync_interval: settings.resync_interval(),
        }
    }
}

/// Counters exposed for monitoring and tests.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorStats {
    /// Entity versions successfully applied.
    pub entities_applied: u64,
    /// Logical entities whose version chain was exhausted.
    pub entities_failed: u64,
    /// Delta batches processed.
    pub batches_processed: u64,
    /// Delta batches that finished with failures.
    pub batches_failed: u64,
    /// Stream resubscription attempts.
    pub stream_retries: u64,
    /// Terminal stream events observed.
    pub stream_terminations: u64,
}

/// Orchestrates the bootstrap load and the continuous update stream.
pub struct UpdateOrchestrator {
    applier: Arc<EntityApplier>,
    store: Arc<dyn ConfigStoreClient>,
    audit: Arc<AuditLog>,
    metrics: UpdateMetrics,
    config: OrchestratorConfig,
    stats: Arc<RwLock<OrchestratorStats>>,
    load_complete: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl UpdateOrchestrator {
    /// Creates an orchestrator over the given collaborators.
    pub fn new(
        applier: Arc<EntityApplier>,
        store: Arc<dyn ConfigStoreClient>,
        audit: Arc<AuditLog>,
        config: OrchestratorConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            applier,
            store,
            audit,
            metrics: UpdateMetrics::new(),
            config,
            stats: Arc::new(RwLock::new(OrchestratorStats::default())),
            load_complete: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Runs the bootstrap load, then starts the background subscriptions.
    ///
    /// Blocks until bootstrap completes. In strict-startup mode any
    /// entity whose version chain is exhausted aborts startup; otherwise
    /// the gateway starts with whatever subset loaded successfully.
    #[instrument(skip(self), fields(kind = %self.config.kind))]
    pub async fn start(self: &Arc<Self>) -> Result<(), OrchestratorError> {
        self.bootstrap().await?;
        self.load_complete.store(true, Ordering::SeqCst);

        let mut tasks = self.tasks.lock().await;
        tasks.push(self.spawn_stream_task());
        if let Some(interval) = self.config.resync_interval {
            tasks.push(self.spawn_resync_task(interval));
        }
        Ok(())
    }

    /// Signals shutdown and joins every background subscription.
    ///
    /// Idempotent; safe to call before `start()` or more than once. An
    /// in-flight batch is allowed to finish, but no further batches are
    /// processed.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let mut tasks = self.tasks.lock().await;
        for handle in tasks.drain(..) {
            let _ = handle.await;
        }
        info!("Update orchestrator stopped");
    }

    /// Whether the bootstrap phase has finished.
    pub fn load_complete(&self) -> bool {
        self.load_complete.load(Ordering::SeqCst)
    }

    /// Gets the current statistics.
    pub async fn stats(&self) -> OrchestratorStats {
        self.stats.read().await.clone()
    }

    /// The applier driving this orchestrator.
    pub fn applier(&self) -> &Arc<EntityApplier> {
        &self.applier
    }

    async fn bootstrap(&self) -> Result<(), OrchestratorError> {
        let entities = self.store.get_entity_info(self.config.kind).await?;
        info!(count = entities.len(), "Starting bootstrap load");

        let mut failures = 0;
        for entity in &entities {
            failures += self.apply_with_fallback(entity, ChangeType::Add).await;
        }

        if failures > 0 {
            self.stats.write().await.entities_failed += failures as u64;
            if self.config.strict_startup {
                error!(failures, "Bootstrap failed in strict-startup mode");
                return Err(OrchestratorError::Startup { failures });
            }
            warn!(
                failures,
                "Bootstrap completed with failures; continuing with partial availability"
            );
        } else {
            info!("Bootstrap complete");
        }

        self.metrics
            .record_loaded(self.applier.currently_loaded().await.len());
        Ok(())
    }

    /// Applies one announced change, walking the prior-version chain on
    /// failure.
    ///
    /// Returns the number of *distinct* failure causes if the chain was
    /// exhausted, or zero if some version in the chain applied. Identical
    /// causes across the chain collapse into one.
    async fn apply_with_fallback(&self, announced: &EntityInfo, change: ChangeType) -> usize {
        let mut causes: Vec<UpdateError> = Vec::new();
        let mut attempt = Some(announced);

        while let Some(entity) = attempt {
            match self.applier.apply(entity, change).await {
                Ok(()) => {
                    match change {
                        ChangeType::Delete => {
                            self.audit.record_unload(&entity.identity.to_string()).await;
                        }
                        _ => {
                            self.audit
                                .record_update(&change.to_string(), &entity.identity.to_string())
                                .await;
                        }
                    }
                    self.metrics.record_applied();
                    self.stats.write().await.entities_applied += 1;

                    if entity.identity != announced.identity {
                        info!(
                            announced = %announced.identity,
                            served = %entity.identity,
                            "Announced version failed; serving prior version"
                        );
                    }
                    return 0;
                }
                Err(err) => {
                    warn!(entity = %entity.identity, error = %err, "Entity load attempt failed");
                    self.audit
                        .record_load_failure(
                            &change.to_string(),
                            &entity.identity.to_string(),
                            &err.to_string(),
                        )
                        .await;
                    self.metrics.record_load_failure();
                    if !causes.contains(&err) {
                        causes.push(err);
                    }
                    attempt = entity.prior.as_deref();
                }
            }
        }

        error!(
            entity = %announced.identity,
            causes = causes.len(),
            "Version chain exhausted; entity unavailable"
        );
        causes.len()
    }

    /// Processes one delta batch in delivery order.
    ///
    /// Entity-level failures are contained per delta; if any entity's
    /// chain is exhausted the whole batch surfaces as
    /// [`OrchestratorError::Batch`]. The caller keeps the subscription
    /// alive regardless.
    pub async fn process_batch(&self, batch: &DeltaBatch) -> Result<(), OrchestratorError> {
        let mut failures = 0;
        for delta in &batch.deltas {
            failures += self.apply_with_fallback(&delta.info, delta.change).await;
        }

        let mut stats = self.stats.write().await;
        stats.batches_processed += 1;
        if failures > 0 {
            stats.batches_failed += 1;
            stats.entities_failed += failures as u64;
            drop(stats);
            self.metrics.record_batch_failed();
            return Err(OrchestratorError::Batch { failures });
        }
        Ok(())
    }

    /// Re-enumerates the store and re-applies entities whose announced
    /// identity differs from the loaded one.
    ///
    /// This is how entities that stayed unavailable after bootstrap (or
    /// drifted while the stream was down) are recovered on later cycles.
    /// Returns the number of entities re-applied.
    pub async fn resync(&self) -> Result<usize, OrchestratorError> {
        let listed = self.store.get_entity_info(self.config.kind).await?;

        let mut applied = 0;
        for entity in &listed {
            let loaded = self.applier.loaded_version(entity.logical_id()).await;
            if loaded.as_ref() == Some(&entity.identity) {
                continue;
            }
            let change = if loaded.is_some() {
                ChangeType::Update
            } else {
                ChangeType::Add
            };
            if self.apply_with_fallback(entity, change).await == 0 {
                applied += 1;
            }
        }

        if applied > 0 {
            info!(applied, "Resync sweep re-applied entities");
            self.metrics
                .record_loaded(self.applier.currently_loaded().await.len());
        }
        Ok(applied)
    }

    fn spawn_stream_task(self: &Arc<Self>) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_rx.clone();

        tokio::spawn(async move {
            let mut attempt: u32 = 0;

            loop {
                if *shutdown_rx.borrow() {
                    return;
                }

                let cursor = orchestrator.applier.currently_loaded().await;
                match orchestrator
                    .store
                    .subscribe_updates(cursor, orchestrator.config.kind)
                    .await
                {
                    Ok(mut subscription) => {
                        info!(kind = %orchestrator.config.kind, "Delta subscription established");
                        attempt = 0;

                        loop {
                            tokio::select! {
                                changed = shutdown_rx.changed() => {
                                    if changed.is_err() || *shutdown_rx.borrow() {
                                        orchestrator.note_termination("shutdown").await;
                                        return;
                                    }
                                }
                                event = subscription.recv() => match event {
                                    Some(Ok(batch)) => {
                                        debug!(deltas = batch.len(), "Received delta batch");
                                        if let Err(err) = orchestrator.process_batch(&batch).await {
                                            error!(error = %err, "Delta batch completed with failures");
                                        }
                                        orchestrator.metrics.record_loaded(
                                            orchestrator.applier.currently_loaded().await.len(),
                                        );
                                    }
                                    Some(Err(err)) => {
                                        warn!(error = %err, "Delta stream failed");
                                        orchestrator.note_termination(&err.to_string()).await;
                                        break;
                                    }
                                    None => {
                                        orchestrator
                                            .note_termination("stream closed by config store")
                                            .await;
                                        break;
                                    }
                                }
                            }
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "Failed to open delta subscription");
                    }
                }

                if attempt >= orchestrator.config.retry.max_attempts() {
                    error!("Retry attempts exhausted; delta stream abandoned");
                    return;
                }
                let delay = orchestrator.config.retry.delay_for(attempt);
                attempt = attempt.saturating_add(1);
                orchestrator.stats.write().await.stream_retries += 1;
                orchestrator.metrics.record_stream_retry();
                debug!(
                    delay_ms = delay.as_millis() as u64,
                    attempt, "Backing off before resubscribing"
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            return;
                        }
                    }
                }
            }
        })
    }

    fn spawn_resync_task(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_rx.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately; bootstrap already ran.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = orchestrator.resync().await {
                            warn!(error = %err, "Resync sweep failed");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            return;
                        }
                    }
                }
            }
        })
    }

    async fn note_termination(&self, reason: &str) {
        self.audit.record_termination(reason).await;
        self.stats.write().await.stream_terminations += 1;
    }
}
