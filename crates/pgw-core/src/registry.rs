//! In-memory registry of currently-active entity versions.
//!
//! The registry maps a logical entity request (short name plus a major or
//! major.minor version string) to the concrete patch version that should
//! serve it. It enforces global uniqueness of short names across path
//! families and implements version forwarding for major-only requests.
//!
//! ## Disabled-version asymmetry
//!
//! Exact `major.minor` lookups and major-only lookups treat a disabled
//! current patch differently, and the difference is deliberate:
//!
//! - An exact `major.minor` request whose current patch is disabled
//!   resolves to nothing. It never falls back to another minor.
//! - A major-only request skips disabled minors entirely and forwards to
//!   the next-highest eligible minor.
//!
//! Callers pinning an exact minor asked for that minor and nothing else;
//! callers requesting a major asked for "the best of this major". Both
//! behaviors are pinned by tests below; do not unify them.

use crate::entity::{ActivationStatus, EntityIdentity, EntityVersion, VersionRequest};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Errors raised by registry mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Two distinct path families claim the same short name.
    #[error("short name '{short_name}' is registered under '{existing}', rejecting '{incoming}'")]
    Conflict {
        /// The contested short name.
        short_name: String,
        /// Family path currently owning the short name.
        existing: String,
        /// Family path that attempted to claim it.
        incoming: String,
    },
}

/// Current patch pointer of one `major.minor` slot.
///
/// An update replaces the pointer in place; superseded patches are not
/// retained, so an explicit downgrade becomes the new current patch.
#[derive(Debug, Clone, Copy)]
struct MinorSlot {
    patch: u32,
    status: ActivationStatus,
}

/// Slots of one family, keyed major then minor.
type FamilySlots = BTreeMap<u32, BTreeMap<u32, MinorSlot>>;

#[derive(Debug, Default)]
struct RegistryState {
    /// Registered slots keyed by family path.
    families: HashMap<String, FamilySlots>,
    /// Short-name ownership index: short name to family path.
    by_short_name: HashMap<String, String>,
}

/// Thread-safe registry of active entity versions.
///
/// Mutations come from the single update pipeline; `resolve` may be called
/// concurrently from request-serving threads. Resolution is a pure
/// function of current registry state, so the order in which entries were
/// registered never affects the result.
#[derive(Debug, Default)]
pub struct VersionRegistry {
    state: RwLock<RegistryState>,
}

impl VersionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the slot for `identity`'s full path.
    ///
    /// Fails with [`RegistryError::Conflict`] without mutating anything if
    /// the short name is owned by a different family. Only families with
    /// at least one registered slot count as owners; fully removed
    /// families release their short name.
    pub fn set(
        &self,
        identity: &EntityIdentity,
        status: ActivationStatus,
    ) -> Result<(), RegistryError> {
        let family_path = identity.family_path().to_string();
        let mut state = self.state.write();

        if let Some(existing) = state.by_short_name.get(&identity.short_name) {
            if *existing != family_path {
                return Err(RegistryError::Conflict {
                    short_name: identity.short_name.clone(),
                    existing: existing.clone(),
                    incoming: family_path,
                });
            }
        }

        state
            .by_short_name
            .insert(identity.short_name.clone(), family_path.clone());
        state
            .families
            .entry(family_path)
            .or_default()
            .entry(identity.version.major)
            .or_default()
            .insert(
                identity.version.minor,
                MinorSlot {
                    patch: identity.version.patch,
                    status,
                },
            );
        Ok(())
    }

    /// Read-only variant of the conflict check performed by [`set`](Self::set).
    ///
    /// Lets the update pipeline reject a conflicting entity before any
    /// downstream side effects, instead of discovering the conflict after
    /// the body has already been pushed.
    pub fn ensure_claimable(&self, identity: &EntityIdentity) -> Result<(), RegistryError> {
        let family_path = identity.family_path();
        let state = self.state.read();
        match state.by_short_name.get(&identity.short_name) {
            Some(existing) if existing != family_path => Err(RegistryError::Conflict {
                short_name: identity.short_name.clone(),
                existing: existing.clone(),
                incoming: family_path.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Removes the slot keyed by `identity`'s full path, if and only if it
    /// is registered under that exact identity.
    ///
    /// Removal is idempotent and ownership-scoped: a caller holding a
    /// conflicting family path, an unknown slot, or a stale patch number
    /// is a silent no-op. Emptied families are pruned and their short
    /// name becomes claimable again.
    pub fn remove(&self, identity: &EntityIdentity) {
        let family_path = identity.family_path();
        let mut state = self.state.write();

        match state.by_short_name.get(&identity.short_name) {
            Some(owner) if owner == family_path => {}
            _ => return,
        }

        let family_now_empty = {
            let Some(majors) = state.families.get_mut(family_path) else {
                return;
            };
            let Some(minors) = majors.get_mut(&identity.version.major) else {
                return;
            };
            match minors.get(&identity.version.minor) {
                Some(slot) if slot.patch == identity.version.patch => {}
                _ => return,
            }

            minors.remove(&identity.version.minor);
            if minors.is_empty() {
                majors.remove(&identity.version.major);
            }
            majors.is_empty()
        };

        if family_now_empty {
            state.families.remove(family_path);
            state.by_short_name.remove(&identity.short_name);
        }
    }

    /// Resolves a logical request to the concrete identity that should
    /// serve it, or `None` if nothing eligible is registered.
    ///
    /// Absence is not an error: unknown short names, unknown versions,
    /// and versions whose current patch is disabled all return `None`.
    pub fn resolve(&self, short_name: &str, request: VersionRequest) -> Option<EntityIdentity> {
        let state = self.state.read();
        let family_path = state.by_short_name.get(short_name)?;
        let majors = state.families.get(family_path)?;

        match request {
            VersionRequest::Exact { major, minor } => {
                let slot = majors.get(&major)?.get(&minor)?;
                slot.status
                    .is_resolvable()
                    .then(|| Self::identity_for(family_path, major, minor, slot))
            }
            VersionRequest::Major(major) => {
                let minors = majors.get(&major)?;
                minors
                    .iter()
                    .rev()
                    .find(|(_, slot)| slot.status.is_resolvable())
                    .map(|(minor, slot)| Self::identity_for(family_path, major, *minor, slot))
            }
        }
    }

    /// Number of registered `major.minor` slots.
    pub fn len(&self) -> usize {
        let state = self.state.read();
        state
            .families
            .values()
            .flat_map(|majors| majors.values())
            .map(|minors| minors.len())
            .sum()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.state.read().families.is_empty()
    }

    fn identity_for(family_path: &str, major: u32, minor: u32, slot: &MinorSlot) -> EntityIdentity {
        EntityIdentity::new(family_path, EntityVersion::new(major, minor, slot.patch))
    }
}
