// Proof-gated weighted admissions.
// Rosters are immutable merkle commitments published per group; admission is
// a stateless proof check plus one atomic append into both weight indexes.

use crate::index::{IndexError, WeightedIndex};
use crate::merkle::{leaf_hash, verify_proof};
use crate::{Address, Hash};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

pub type EntryId = u64;
pub type GroupId = u16;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    #[error("group {0} already has a published root")]
    RootAlreadySet(GroupId),
    #[error("group {0} has no published root")]
    UnknownGroup(GroupId),
    #[error("merkle proof does not authenticate the claimed tuple")]
    InvalidProof,
    #[error("owner already admitted to group {0}")]
    AlreadyAdmitted(GroupId),
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Which weight universe a lookup or draw runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Global,
    Group(GroupId),
}

/// One admitted member. Weight and rank are fixed at admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightedEntry {
    pub owner: Address,
    pub weight: u64,
    /// Auxiliary tie-break attribute carried from the roster; not used by
    /// weight lookups.
    pub rank: u16,
    pub group: GroupId,
}

/// Admits roster members one-by-one. Every admission appends the same
/// `EntryId` into the global index and into its group's index, so one id
/// resolves consistently in either scope.
#[derive(Debug, Clone, Default)]
pub struct MembershipRegistry {
    roots: HashMap<GroupId, Hash>,
    admitted: HashSet<(Address, GroupId)>,
    entries: Vec<WeightedEntry>,
    global: WeightedIndex,
    groups: HashMap<GroupId, WeightedIndex>,
}

impl MembershipRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the roster commitment for a group. Each group's root is
    /// immutable once set; earlier groups' proofs stay valid forever.
    pub fn publish_root(&mut self, root: Hash, group: GroupId) -> Result<(), RegistryError> {
        if self.roots.contains_key(&group) {
            return Err(RegistryError::RootAlreadySet(group));
        }
        self.roots.insert(group, root);
        debug!(group, root = %hex::encode(root), "roster root published");
        Ok(())
    }

    /// Admit `(owner, weight, rank, group)` against the group's published
    /// root. At most one admission per (owner, group) ever succeeds. All
    /// checks run before any state is written.
    pub fn admit(
        &mut self,
        owner: Address,
        weight: u64,
        rank: u16,
        group: GroupId,
        proof: &[Hash],
    ) -> Result<EntryId, RegistryError> {
        let root = self
            .roots
            .get(&group)
            .ok_or(RegistryError::UnknownGroup(group))?;
        let leaf = leaf_hash(&owner, weight, rank, group);
        if !verify_proof(leaf, proof, root) {
            return Err(RegistryError::InvalidProof);
        }
        if self.admitted.contains(&(owner, group)) {
            return Err(RegistryError::AlreadyAdmitted(group));
        }
        if weight == 0 {
            // Checked here so the two appends below cannot fail halfway.
            return Err(IndexError::NonPositiveWeight.into());
        }

        let entry_id = self.entries.len() as EntryId;
        self.global.append(entry_id, weight)?;
        self.groups
            .entry(group)
            .or_default()
            .append(entry_id, weight)?;
        self.entries.push(WeightedEntry {
            owner,
            weight,
            rank,
            group,
        });
        self.admitted.insert((owner, group));
        debug!(
            entry_id,
            group,
            weight,
            owner = %hex::encode(owner),
            "member admitted"
        );
        Ok(entry_id)
    }

    /// Smallest entry whose cumulative weight within `scope` is >= v.
    pub fn upper_lookup(&self, scope: Scope, v: u128) -> Result<EntryId, RegistryError> {
        match self.scope_index(scope) {
            Some(index) => Ok(index.upper_lookup(v)?),
            None => Err(IndexError::OutOfRange(v).into()),
        }
    }

    /// Total admitted weight in `scope` (0 if nothing admitted).
    pub fn total(&self, scope: Scope) -> u128 {
        self.scope_index(scope).map(WeightedIndex::total).unwrap_or(0)
    }

    /// Entries of `scope` whose whole weight interval lies within `[1, v]`.
    pub fn entries_at(&self, scope: Scope, v: u128) -> usize {
        self.scope_index(scope)
            .map(|index| index.entries_at(v))
            .unwrap_or(0)
    }

    pub fn entry(&self, id: EntryId) -> Option<&WeightedEntry> {
        self.entries.get(id as usize)
    }

    pub fn entry_count(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn root(&self, group: GroupId) -> Option<&Hash> {
        self.roots.get(&group)
    }

    pub fn is_admitted(&self, owner: &Address, group: GroupId) -> bool {
        self.admitted.contains(&(*owner, group))
    }

    fn scope_index(&self, scope: Scope) -> Option<&WeightedIndex> {
        match scope {
            Scope::Global => Some(&self.global),
            Scope::Group(group) => self.groups.get(&group),
        }
    }
}
