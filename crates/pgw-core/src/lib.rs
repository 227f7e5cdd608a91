//! # pgw-core
//!
//! Dynamic policy version resolution and live update for Policy Gateway.
//!
//! This crate keeps an in-memory registry of currently-active policy and
//! access-control versions consistent with a remote configuration store
//! that changes at runtime, without restarting the service. A bad update
//! never corrupts the previously-working configuration: failed loads fall
//! back through the entity's prior-version chain, and requests in flight
//! always resolve against a consistent registry state.
//!
//! The pieces, leaves first:
//!
//! - [`VersionRegistry`] resolves logical requests (short name plus a
//!   major or major.minor version) to the concrete patch that should
//!   serve them, enforcing short-name uniqueness and version forwarding.
//! - [`EntityApplier`] applies one change at a time against the registry
//!   and the downstream [`EntitySink`], containing every failure as a
//!   value.
//! - [`UpdateOrchestrator`] runs the bootstrap load and the long-lived
//!   delta-stream subscription, with backoff-and-jitter resubscription
//!   and prior-version fallback.

pub mod applier;
pub mod entity;
pub mod orchestrator;
pub mod registry;
pub mod retry;
pub mod settings;
pub mod sink;
pub mod store;

pub use applier::{EntityApplier, UpdateError, UpdateValidator, VersionGate};
pub use entity::{
    ActivationStatus, ChangeType, Delta, DeltaBatch, EntityBody, EntityIdentity, EntityInfo,
    EntityKind, EntityVersion, VersionRequest,
};
pub use orchestrator::{
    OrchestratorConfig, OrchestratorError, OrchestratorStats, UpdateOrchestrator,
};
pub use registry::{RegistryError, VersionRegistry};
pub use retry::RetryPolicy;
pub use settings::{Environment, GatewaySettings, RetrySettings};
pub use sink::{AccessControlRegistry, EntitySink, SinkError};
pub use store::{ConfigStoreClient, ConfigStoreError, DeltaSubscription, MockConfigStore};
