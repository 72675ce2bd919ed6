// Append-only cumulative-weight index.
// Entries are never removed or reweighted, so any lookup at a position within
// a past snapshot total stays valid forever as new entries are appended.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum IndexError {
    #[error("weight must be positive")]
    NonPositiveWeight,
    #[error("position {0} outside occupied weight range")]
    OutOfRange(u128),
}

/// Monotonic running-total array answering "which entry owns position v".
///
/// Entry at slot `i` owns the half-open interval `(cum[i-1], cum[i]]` of the
/// weight line (base case `cum[-1] = 0`). Slots carry an external entry id so
/// one admission sequence can be indexed both globally and per group.
#[derive(Debug, Clone, Default)]
pub struct WeightedIndex {
    ids: Vec<u64>,
    cum: Vec<u128>,
}

impl WeightedIndex {
    pub fn new() -> Self {
        Self {
            ids: Vec::new(),
            cum: Vec::new(),
        }
    }

    /// Append one entry; returns its slot in this index.
    /// Rejects zero weight so every entry owns a non-empty interval and the
    /// cumulative array stays strictly increasing.
    pub fn append(&mut self, entry_id: u64, weight: u64) -> Result<usize, IndexError> {
        if weight == 0 {
            return Err(IndexError::NonPositiveWeight);
        }
        let base = self.cum.last().copied().unwrap_or(0);
        self.ids.push(entry_id);
        self.cum.push(base + u128::from(weight));
        Ok(self.ids.len() - 1)
    }

    /// Smallest entry whose cumulative total is >= v; total over `1..=total()`.
    pub fn upper_lookup(&self, v: u128) -> Result<u64, IndexError> {
        if v == 0 || v > self.total() {
            return Err(IndexError::OutOfRange(v));
        }
        let slot = self.cum.partition_point(|&c| c < v);
        Ok(self.ids[slot])
    }

    /// Sum of all appended weights (0 if empty).
    pub fn total(&self) -> u128 {
        self.cum.last().copied().unwrap_or(0)
    }

    /// Number of entries whose whole interval lies within `[1, v]`.
    pub fn entries_at(&self, v: u128) -> usize {
        self.cum.partition_point(|&c| c <= v)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
