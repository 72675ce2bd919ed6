// Deterministic multi-winner draws over a frozen weight snapshot.
// The integration point: reads a finalized oracle aggregate and maps
// seed-derived positions through the registry's weight indexes.

use crate::config::DrawConfig;
use crate::oracle::{OracleError, RandomnessOracle, RequestId};
use crate::registry::{EntryId, MembershipRegistry, RegistryError, Scope};
use crate::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info};

pub type DrawId = u64;

const POSITION_DOMAIN: &[u8] = b"raffle.draw.pos";

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DrawError {
    #[error("draw {0} does not exist")]
    UnknownDraw(DrawId),
    #[error("scope has no admitted weight")]
    NoWeight,
    #[error("a draw must request at least one winner")]
    ZeroWinners,
    #[error("scope holds {available} entries, {requested} distinct winners requested")]
    NotEnoughEntries { requested: u32, available: u64 },
    #[error("winner index {index} out of range for {num_winners} winners")]
    IndexOutOfRange { index: u32, num_winners: u32 },
    #[error("draw {0} not resolved yet")]
    NotResolved(DrawId),
    #[error("resample bound exhausted for draw {0}")]
    ResampleExhausted(DrawId),
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// One draw. `snapshot_weight` is captured at request time and never moves,
/// so admissions that land after the request cannot shift the winner set.
#[derive(Debug, Clone)]
pub struct DrawRequest {
    pub scope: Scope,
    pub num_winners: u32,
    pub snapshot_weight: u128,
    pub oracle_request: RequestId,
    winners: Option<Vec<EntryId>>,
}

impl DrawRequest {
    pub fn winners(&self) -> Option<&[EntryId]> {
        self.winners.as_deref()
    }

    pub fn is_resolved(&self) -> bool {
        self.winners.is_some()
    }
}

/// Draw lifecycle owner. Ids are sequential starting at 1.
#[derive(Debug, Clone, Default)]
pub struct DrawManager {
    config: DrawConfig,
    draws: Vec<DrawRequest>,
}

impl DrawManager {
    pub fn new(config: DrawConfig) -> Self {
        Self {
            config,
            draws: Vec::new(),
        }
    }

    /// Fixed commit/reveal window length used for backing oracle requests.
    pub fn draw_window_secs(&self) -> u64 {
        self.config.draw_window_secs
    }

    /// Snapshot the scope's total weight and open a backing oracle request.
    /// In distinct-winner mode the request is rejected up front when the
    /// snapshot cannot possibly yield `num_winners` distinct entries.
    pub fn request_draw(
        &mut self,
        oracle: &mut RandomnessOracle,
        registry: &MembershipRegistry,
        scope: Scope,
        num_winners: u32,
        now: u64,
    ) -> Result<DrawId, DrawError> {
        if num_winners == 0 {
            return Err(DrawError::ZeroWinners);
        }
        let snapshot_weight = registry.total(scope);
        if snapshot_weight == 0 {
            return Err(DrawError::NoWeight);
        }
        if self.config.distinct_winners {
            let available = registry.entries_at(scope, snapshot_weight) as u64;
            if available < u64::from(num_winners) {
                return Err(DrawError::NotEnoughEntries {
                    requested: num_winners,
                    available,
                });
            }
        }

        let oracle_request = oracle.request_randomness(self.config.draw_window_secs, now)?;
        self.draws.push(DrawRequest {
            scope,
            num_winners,
            snapshot_weight,
            oracle_request,
            winners: None,
        });
        let id = self.draws.len() as DrawId;
        debug!(id, ?scope, num_winners, snapshot_weight, oracle_request, "draw requested");
        Ok(id)
    }

    /// Derive and cache the winner list once the backing oracle request is
    /// finalized with a non-empty aggregate. Resolving again is a no-op that
    /// returns the identical cached list.
    pub fn resolve(
        &mut self,
        id: DrawId,
        oracle: &RandomnessOracle,
        registry: &MembershipRegistry,
        now: u64,
    ) -> Result<&[EntryId], DrawError> {
        let idx = self.slot(id)?;
        if self.draws[idx].winners.is_none() {
            let draw = &self.draws[idx];
            let aggregate = oracle.read_randomness(draw.oracle_request, now)?;
            let winners = derive_winners(id, draw, &aggregate, registry, &self.config)?;
            info!(id, winners = winners.len(), "draw resolved");
            self.draws[idx].winners = Some(winners);
        }
        Ok(self.draws[idx].winners.as_deref().unwrap_or(&[]))
    }

    /// Read one cached winner. Requires a prior successful `resolve`.
    pub fn winner_at(&self, id: DrawId, index: u32) -> Result<EntryId, DrawError> {
        let draw = &self.draws[self.slot(id)?];
        if index >= draw.num_winners {
            return Err(DrawError::IndexOutOfRange {
                index,
                num_winners: draw.num_winners,
            });
        }
        match &draw.winners {
            Some(winners) => Ok(winners[index as usize]),
            None => Err(DrawError::NotResolved(id)),
        }
    }

    /// Raw cached winner list.
    pub fn winners(&self, id: DrawId) -> Result<&[EntryId], DrawError> {
        match self.draws[self.slot(id)?].winners() {
            Some(winners) => Ok(winners),
            None => Err(DrawError::NotResolved(id)),
        }
    }

    pub fn draw(&self, id: DrawId) -> Option<&DrawRequest> {
        if id == 0 {
            return None;
        }
        self.draws.get((id - 1) as usize)
    }

    pub fn draw_count(&self) -> u64 {
        self.draws.len() as u64
    }

    fn slot(&self, id: DrawId) -> Result<usize, DrawError> {
        if id == 0 || id > self.draws.len() as u64 {
            return Err(DrawError::UnknownDraw(id));
        }
        Ok((id - 1) as usize)
    }
}

/// Position for winner `i`, resample round `attempt`:
/// `1 + (H(aggregate, i, attempt) mod snapshot_weight)`, always inside the
/// frozen snapshot, so lookups stay valid under concurrent admissions.
fn position(aggregate: &Value, i: u32, attempt: u32, snapshot_weight: u128) -> u128 {
    let mut h = Sha256::new();
    h.update(POSITION_DOMAIN);
    h.update(aggregate);
    h.update(i.to_le_bytes());
    h.update(attempt.to_le_bytes());
    let digest = h.finalize();
    let mut word = [0u8; 16];
    word.copy_from_slice(&digest[..16]);
    1 + u128::from_le_bytes(word) % snapshot_weight
}

fn derive_winners(
    id: DrawId,
    draw: &DrawRequest,
    aggregate: &Value,
    registry: &MembershipRegistry,
    config: &DrawConfig,
) -> Result<Vec<EntryId>, DrawError> {
    let mut winners = Vec::with_capacity(draw.num_winners as usize);
    let mut seen: HashSet<EntryId> = HashSet::new();

    for i in 0..draw.num_winners {
        let mut attempt = 0u32;
        let entry = loop {
            let pos = position(aggregate, i, attempt, draw.snapshot_weight);
            let entry = registry.upper_lookup(draw.scope, pos)?;
            if !config.distinct_winners || seen.insert(entry) {
                break entry;
            }
            attempt += 1;
            if attempt >= config.max_resample_attempts {
                return Err(DrawError::ResampleExhausted(id));
            }
        };
        winners.push(entry);
    }
    Ok(winners)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkle::{leaf_hash, MerkleTree};
    use crate::oracle::hash_preimage;
    use crate::registry::GroupId;
    use crate::Address;

    const T0: u64 = 10_000;
    const WINDOW: u64 = 300;
    const GROUP: GroupId = 0;

    fn owner(seed: u8) -> Address {
        [seed; 32]
    }

    /// Registry with `weights` admitted into one group; returns proofs too so
    /// tests can admit more members later.
    fn seeded_registry(weights: &[u64]) -> (MembershipRegistry, MerkleTree) {
        let leaves: Vec<_> = weights
            .iter()
            .enumerate()
            .map(|(i, w)| leaf_hash(&owner(i as u8 + 1), *w, i as u16, GROUP))
            .collect();
        let tree = MerkleTree::from_leaves(leaves).expect("tree");
        let mut registry = MembershipRegistry::new();
        registry.publish_root(tree.root(), GROUP).expect("publish");
        for (i, w) in weights.iter().enumerate() {
            registry
                .admit(
                    owner(i as u8 + 1),
                    *w,
                    i as u16,
                    GROUP,
                    &tree.proof(i).unwrap(),
                )
                .expect("admit");
        }
        (registry, tree)
    }

    /// Drive the backing oracle request through commit + reveal of `seed`.
    fn feed_oracle(oracle: &mut RandomnessOracle, request: u64, seed: Value, t: u64) -> u64 {
        oracle
            .commit_randomness(request, hash_preimage(&seed), t)
            .expect("commit");
        oracle
            .reveal_randomness(request, seed, t + WINDOW)
            .expect("reveal");
        t + 2 * WINDOW
    }

    #[test]
    fn request_rejects_degenerate_inputs() {
        let mut oracle = RandomnessOracle::default();
        let (registry, _) = seeded_registry(&[10]);
        let mut manager = DrawManager::default();

        assert_eq!(
            manager.request_draw(&mut oracle, &registry, Scope::Global, 0, T0),
            Err(DrawError::ZeroWinners)
        );
        assert_eq!(
            manager.request_draw(&mut oracle, &registry, Scope::Group(7), 1, T0),
            Err(DrawError::NoWeight)
        );
        assert_eq!(oracle.request_count(), 0, "no backing request on failure");
    }

    #[test]
    fn request_opens_backing_oracle_request() {
        let mut oracle = RandomnessOracle::default();
        let (registry, _) = seeded_registry(&[10, 20, 30]);
        let mut manager = DrawManager::default();

        let id = manager
            .request_draw(&mut oracle, &registry, Scope::Global, 2, T0)
            .expect("draw");
        let draw = manager.draw(id).expect("exists");
        assert_eq!(draw.snapshot_weight, 60);
        assert_eq!(draw.num_winners, 2);
        assert!(!draw.is_resolved());

        let backing = oracle.request(draw.oracle_request).expect("backing");
        assert_eq!(backing.duration, manager.draw_window_secs());
        assert_eq!(backing.created_at, T0);
    }

    #[test]
    fn resolve_is_memoized_and_deterministic() {
        let mut oracle = RandomnessOracle::default();
        let (registry, _) = seeded_registry(&[10, 20, 30]);
        let mut manager = DrawManager::default();

        let id = manager
            .request_draw(&mut oracle, &registry, Scope::Global, 5, T0)
            .expect("draw");
        let request = manager.draw(id).unwrap().oracle_request;

        assert_eq!(
            manager.resolve(id, &oracle, &registry, T0 + 1),
            Err(DrawError::Oracle(OracleError::NotFinalized(request)))
        );

        let done = feed_oracle(&mut oracle, request, [0x5a; 32], T0);
        let first = manager
            .resolve(id, &oracle, &registry, done)
            .expect("resolve")
            .to_vec();
        assert_eq!(first.len(), 5);
        assert!(first.iter().all(|&e| e < 3));

        let second = manager
            .resolve(id, &oracle, &registry, done + 1_000)
            .expect("re-resolve")
            .to_vec();
        assert_eq!(first, second);
    }

    #[test]
    fn winners_unaffected_by_admissions_after_request() {
        let mut oracle_a = RandomnessOracle::default();
        let mut oracle_b = RandomnessOracle::default();
        let (registry_frozen, _) = seeded_registry(&[10, 20, 30]);
        let (mut registry_growing, _) = seeded_registry(&[10, 20, 30]);
        let mut manager_a = DrawManager::default();
        let mut manager_b = DrawManager::default();

        let draw_a = manager_a
            .request_draw(&mut oracle_a, &registry_frozen, Scope::Global, 4, T0)
            .expect("draw");
        let draw_b = manager_b
            .request_draw(&mut oracle_b, &registry_growing, Scope::Global, 4, T0)
            .expect("draw");

        // Two more members join group 1 after the draw request.
        let extra = [(owner(0xA0), 500u64), (owner(0xA1), 700u64)];
        let leaves: Vec<_> = extra
            .iter()
            .map(|(o, w)| leaf_hash(o, *w, 0, 1))
            .collect();
        let tree = MerkleTree::from_leaves(leaves).expect("tree");
        registry_growing.publish_root(tree.root(), 1).expect("publish");
        for (i, (o, w)) in extra.iter().enumerate() {
            registry_growing
                .admit(*o, *w, 0, 1, &tree.proof(i).unwrap())
                .expect("late admit");
        }
        assert_eq!(registry_growing.total(Scope::Global), 60 + 1200);

        let seed = [0xC3; 32];
        let t_a = feed_oracle(&mut oracle_a, 1, seed, T0);
        let t_b = feed_oracle(&mut oracle_b, 1, seed, T0);

        let frozen = manager_a
            .resolve(draw_a, &oracle_a, &registry_frozen, t_a)
            .expect("resolve")
            .to_vec();
        let grown = manager_b
            .resolve(draw_b, &oracle_b, &registry_growing, t_b)
            .expect("resolve")
            .to_vec();
        assert_eq!(frozen, grown, "snapshot isolation");
        assert!(grown.iter().all(|&e| e < 3), "late entries never win");
    }

    #[test]
    fn winner_at_checks_range_then_resolution() {
        let mut oracle = RandomnessOracle::default();
        let (registry, _) = seeded_registry(&[10, 20]);
        let mut manager = DrawManager::default();

        let id = manager
            .request_draw(&mut oracle, &registry, Scope::Global, 2, T0)
            .expect("draw");

        assert_eq!(
            manager.winner_at(id, 2),
            Err(DrawError::IndexOutOfRange {
                index: 2,
                num_winners: 2
            })
        );
        assert_eq!(manager.winner_at(id, 0), Err(DrawError::NotResolved(id)));
        assert_eq!(manager.winners(id), Err(DrawError::NotResolved(id)));
        assert_eq!(manager.winner_at(9, 0), Err(DrawError::UnknownDraw(9)));

        let done = feed_oracle(&mut oracle, 1, [1u8; 32], T0);
        let winners = manager
            .resolve(id, &oracle, &registry, done)
            .expect("resolve")
            .to_vec();
        assert_eq!(manager.winner_at(id, 0), Ok(winners[0]));
        assert_eq!(manager.winner_at(id, 1), Ok(winners[1]));
    }

    #[test]
    fn distinct_mode_yields_distinct_winners() {
        let mut oracle = RandomnessOracle::default();
        let (registry, _) = seeded_registry(&[10, 20, 30, 40, 50]);
        let mut manager = DrawManager::new(DrawConfig {
            distinct_winners: true,
            ..DrawConfig::default()
        });

        let id = manager
            .request_draw(&mut oracle, &registry, Scope::Global, 5, T0)
            .expect("draw");
        let done = feed_oracle(&mut oracle, 1, [0x77; 32], T0);
        let winners = manager
            .resolve(id, &oracle, &registry, done)
            .expect("resolve")
            .to_vec();

        let mut unique = winners.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 5, "all five entries drawn exactly once");
    }

    #[test]
    fn distinct_mode_rejects_infeasible_requests_up_front() {
        let mut oracle = RandomnessOracle::default();
        let (registry, _) = seeded_registry(&[10, 20]);
        let mut manager = DrawManager::new(DrawConfig {
            distinct_winners: true,
            ..DrawConfig::default()
        });

        assert_eq!(
            manager.request_draw(&mut oracle, &registry, Scope::Global, 3, T0),
            Err(DrawError::NotEnoughEntries {
                requested: 3,
                available: 2
            })
        );
    }

    #[test]
    fn group_scope_draw_only_picks_group_members() {
        let mut oracle = RandomnessOracle::default();
        let (mut registry, _) = seeded_registry(&[10, 20, 30]);

        // Second group with one heavy member (global entry id 3).
        let leaves = vec![leaf_hash(&owner(0xB0), 1_000, 0, 1)];
        let tree = MerkleTree::from_leaves(leaves).expect("tree");
        registry.publish_root(tree.root(), 1).expect("publish");
        registry
            .admit(owner(0xB0), 1_000, 0, 1, &tree.proof(0).unwrap())
            .expect("admit");

        let mut manager = DrawManager::default();
        let id = manager
            .request_draw(&mut oracle, &registry, Scope::Group(1), 3, T0)
            .expect("draw");
        let done = feed_oracle(&mut oracle, 1, [0x0f; 32], T0);
        let winners = manager
            .resolve(id, &oracle, &registry, done)
            .expect("resolve");
        assert!(winners.iter().all(|&e| e == 3));
    }
}
