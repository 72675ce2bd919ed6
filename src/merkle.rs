// Roster commitments: Sha256 merkle tree over (owner, weight, rank, group)
// tuples with sorted-pair interior hashing, so proofs carry no direction bits.

use crate::{Address, Hash};
use sha2::{Digest, Sha256};

// Domain prefixes keep leaves and interior nodes in disjoint hash domains.
const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

/// Deterministic leaf encoding for one roster tuple.
/// Numeric fields are little-endian.
pub fn leaf_hash(owner: &Address, weight: u64, rank: u16, group: u16) -> Hash {
    let mut h = Sha256::new();
    h.update([LEAF_PREFIX]);
    h.update(owner);
    h.update(weight.to_le_bytes());
    h.update(rank.to_le_bytes());
    h.update(group.to_le_bytes());
    h.finalize().into()
}

/// Hash two sibling nodes, smaller hash first.
pub fn hash_pair(a: &Hash, b: &Hash) -> Hash {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut h = Sha256::new();
    h.update([NODE_PREFIX]);
    h.update(lo);
    h.update(hi);
    h.finalize().into()
}

/// Stateless inclusion check: fold the sibling path from `leaf` and compare
/// against `root`.
pub fn verify_proof(leaf: Hash, proof: &[Hash], root: &Hash) -> bool {
    let mut current = leaf;
    for sibling in proof {
        current = hash_pair(&current, sibling);
    }
    current == *root
}

/// In-memory tree used to build rosters and extract per-leaf proofs.
/// The verifying side only ever needs `verify_proof` and the published root.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<Hash>>,
}

impl MerkleTree {
    /// Build from pre-hashed leaves. Odd nodes are paired with themselves,
    /// matching what `verify_proof` reconstructs.
    pub fn from_leaves(leaves: Vec<Hash>) -> Option<Self> {
        if leaves.is_empty() {
            return None;
        }
        let mut levels = vec![leaves];
        while levels.last().map(Vec::len).unwrap_or(0) > 1 {
            let prev = levels.last().expect("non-empty levels");
            let mut next: Vec<Hash> = Vec::with_capacity(prev.len().div_ceil(2));
            let mut i = 0;
            while i < prev.len() {
                let a = prev[i];
                let b = if i + 1 < prev.len() { prev[i + 1] } else { prev[i] };
                next.push(hash_pair(&a, &b));
                i += 2;
            }
            levels.push(next);
        }
        Some(Self { levels })
    }

    pub fn root(&self) -> Hash {
        self.levels.last().expect("non-empty levels")[0]
    }

    /// Sibling path for the leaf at `index`, bottom-up. None if out of range.
    pub fn proof(&self, index: usize) -> Option<Vec<Hash>> {
        if index >= self.levels[0].len() {
            return None;
        }
        let mut path = Vec::with_capacity(self.levels.len());
        let mut pos = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = if pos % 2 == 0 {
                // Odd tail pairs with itself.
                *level.get(pos + 1).unwrap_or(&level[pos])
            } else {
                level[pos - 1]
            };
            path.push(sibling);
            pos /= 2;
        }
        Some(path)
    }

    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }
}
