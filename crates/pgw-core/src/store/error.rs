//! Error types for config-store operations.

use thiserror::Error;

/// Errors raised by [`ConfigStoreClient`](super::ConfigStoreClient)
/// operations.
///
/// Entity-level failures (`NotFound`, `Decode`) surface through the update
/// pipeline as contained apply errors. `Connection` failures on the delta
/// stream itself are retried with backoff by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigStoreError {
    /// Failed to reach or stay connected to the config store.
    #[error("config store connection error: {0}")]
    Connection(String),

    /// The requested entity does not exist in the store.
    #[error("entity not found in config store: {0}")]
    NotFound(String),

    /// The store returned a payload that could not be decoded.
    #[error("failed to decode entity payload: {0}")]
    Decode(String),

    /// The delta subscription was closed by the store.
    #[error("update subscription closed")]
    SubscriptionClosed,
}
