//! Data model for versioned policy entities.
//!
//! Entities are externally-sourced configuration units (policies or
//! access-control definitions) identified by a path-based location and a
//! three-component version. Each entity announcement may carry a chain of
//! prior versions used for rollback when a newly published version fails
//! to load.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// A three-component entity version.
///
/// Activation status is tracked per patch; the registry resolves major and
/// major.minor requests to a concrete patch version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityVersion {
    /// Major version component.
    pub major: u32,
    /// Minor version component.
    pub minor: u32,
    /// Patch version component.
    pub patch: u32,
}

impl EntityVersion {
    /// Creates a new version from its components.
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl std::fmt::Display for EntityVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Activation status of a registered entity version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationStatus {
    /// Deployed and serving requests.
    Active,
    /// Deployed and resolvable, but not the preferred serving state.
    Available,
    /// Retained in the registry but never returned by resolution.
    Disabled,
}

impl ActivationStatus {
    /// Returns `true` if entries with this status may be returned by
    /// resolution.
    pub fn is_resolvable(&self) -> bool {
        matches!(self, ActivationStatus::Active | ActivationStatus::Available)
    }
}

impl std::fmt::Display for ActivationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivationStatus::Active => write!(f, "active"),
            ActivationStatus::Available => write!(f, "available"),
            ActivationStatus::Disabled => write!(f, "disabled"),
        }
    }
}

/// Kind discriminator for config-store lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A business policy / rule set.
    Policy,
    /// An access-control definition.
    AccessControl,
}

impl EntityKind {
    /// Returns the wire-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Policy => "policy",
            EntityKind::AccessControl => "access_control",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Canonical identity of one entity version.
///
/// `full_path` is the canonical location including the major.minor segment
/// (e.g. `lob/bu/policyName/1.2`). The *family path* is the location
/// without that trailing segment; `short_name` is the last family segment
/// and must map to exactly one family at any time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityIdentity {
    /// Last segment of the family path.
    pub short_name: String,
    /// Canonical location, `family/major.minor`.
    pub full_path: String,
    /// Full version, including the patch component.
    pub version: EntityVersion,
}

impl EntityIdentity {
    /// Builds an identity from a family path (e.g. `lob/bu/policyName`)
    /// and a version.
    pub fn new(family_path: &str, version: EntityVersion) -> Self {
        let short_name = family_path
            .rsplit('/')
            .next()
            .unwrap_or(family_path)
            .to_string();
        Self {
            short_name,
            full_path: format!("{}/{}.{}", family_path, version.major, version.minor),
            version,
        }
    }

    /// Returns the family path: the canonical location without its
    /// trailing version segment.
    pub fn family_path(&self) -> &str {
        match self.full_path.rsplit_once('/') {
            Some((family, _)) => family,
            None => &self.full_path,
        }
    }
}

impl std::fmt::Display for EntityIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.full_path, self.version.patch)
    }
}

/// A requested version in a resolution call.
///
/// Parsed from the string forms `"1"` (major-only, forwarded to the best
/// eligible minor) and `"1.2"` (pinned to an exact minor).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionRequest {
    /// Major-only request; forwarded to the highest eligible minor.
    Major(u32),
    /// Exact major.minor request; never forwarded to another minor.
    Exact { major: u32, minor: u32 },
}

/// Error returned when a requested-version string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid version request '{input}': expected 'major' or 'major.minor'")]
pub struct VersionRequestError {
    /// The rejected input.
    pub input: String,
}

impl FromStr for VersionRequest {
    type Err = VersionRequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || VersionRequestError {
            input: s.to_string(),
        };
        match s.split_once('.') {
            None => s.parse::<u32>().map(VersionRequest::Major).map_err(|_| invalid()),
            Some((major, minor)) => {
                let major = major.parse::<u32>().map_err(|_| invalid())?;
                let minor = minor.parse::<u32>().map_err(|_| invalid())?;
                Ok(VersionRequest::Exact { major, minor })
            }
        }
    }
}

/// An entity announcement from the config store.
///
/// Carries the identity and activation status of one version, plus an
/// immutable singly-linked chain of prior versions (newest first) that the
/// orchestrator walks when the announced version fails to load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityInfo {
    /// Identity of the announced version.
    pub identity: EntityIdentity,
    /// Activation status of the announced version.
    pub status: ActivationStatus,
    /// Next-older version of the same logical entity, if any.
    pub prior: Option<Box<EntityInfo>>,
}

impl EntityInfo {
    /// Creates an announcement with no prior-version chain.
    pub fn new(identity: EntityIdentity, status: ActivationStatus) -> Self {
        Self {
            identity,
            status,
            prior: None,
        }
    }

    /// Attaches a prior version, returning the updated announcement.
    pub fn with_prior(mut self, prior: EntityInfo) -> Self {
        self.prior = Some(Box::new(prior));
        self
    }

    /// Stable key of the logical entity this version belongs to.
    pub fn logical_id(&self) -> &str {
        &self.identity.short_name
    }

    /// Length of the version chain, counting this version.
    pub fn chain_len(&self) -> usize {
        let mut len = 1;
        let mut cursor = self.prior.as_deref();
        while let Some(info) = cursor {
            len += 1;
            cursor = info.prior.as_deref();
        }
        len
    }
}

/// Opaque entity payload fetched from the config store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityBody {
    /// Entity content; the schema is owned by the config store.
    pub content: serde_json::Value,
}

impl EntityBody {
    /// Wraps raw content in a body.
    pub fn new(content: serde_json::Value) -> Self {
        Self { content }
    }
}

/// Kind of change announced by a delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// A version not previously loaded.
    Add,
    /// A replacement for a loaded version.
    Update,
    /// Removal of a loaded entity.
    Delete,
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeType::Add => write!(f, "add"),
            ChangeType::Update => write!(f, "update"),
            ChangeType::Delete => write!(f, "delete"),
        }
    }
}

/// A single change notification for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    /// Kind of change.
    pub change: ChangeType,
    /// The announced entity version.
    pub info: EntityInfo,
}

impl Delta {
    /// Creates a delta.
    pub fn new(change: ChangeType, info: EntityInfo) -> Self {
        Self { change, info }
    }
}

/// An ordered batch of deltas delivered by the update stream.
///
/// Deltas within a batch are applied in the order received; batches are an
/// atomic unit of work from the subscriber's perspective.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaBatch {
    /// Changes in delivery order.
    pub deltas: Vec<Delta>,
}

impl DeltaBatch {
    /// Creates a batch from a list of deltas.
    pub fn new(deltas: Vec<Delta>) -> Self {
        Self { deltas }
    }

    /// Returns the number of deltas in the batch.
    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    /// Returns `true` if the batch carries no deltas.
    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }
}
