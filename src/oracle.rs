// Two-phase commit/reveal randomness oracle.
// Phase is never stored: it is a pure function of (now, deadlines), so there
// is no stored state machine to forget to advance.

use crate::{Hash, Value};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

pub type RequestId = u64;

const AGG_DOMAIN: &[u8] = b"raffle.agg";

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum OracleError {
    #[error("duration must be positive")]
    ZeroDuration,
    #[error("request {0} does not exist")]
    UnknownRequest(RequestId),
    #[error("commit window closed for request {0}")]
    CommitWindowClosed(RequestId),
    #[error("reveal window not open for request {0}")]
    RevealWindowNotOpen(RequestId),
    #[error("no matching commitment for request {0}")]
    UnknownCommitment(RequestId),
    #[error("commitment already revealed for request {0}")]
    AlreadyRevealed(RequestId),
    #[error("request {0} not finalized")]
    NotFinalized(RequestId),
    #[error("no value was revealed for request {0}")]
    NoRevealOccurred(RequestId),
}

/// Observable lifecycle of one request. Exactly one holds at any `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Commit,
    Reveal,
    Finalized,
}

/// Commitment hash for a preimage. Exposed so callers can compute their
/// commitment off-path before the commit call.
pub fn hash_preimage(preimage: &Value) -> Hash {
    let mut h = Sha256::new();
    h.update(preimage);
    h.finalize().into()
}

/// Rule for folding revealed preimages into one aggregate.
/// Both rules are order-independent; neither claims unbiasability against a
/// strategic last revealer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Bitwise xor of raw preimages. A single reveal reads back unchanged.
    #[default]
    Xor,
    /// Bitwise xor of `Sha256(AGG_DOMAIN || preimage)`, decoupling the
    /// published aggregate from any single preimage.
    HashedXor,
}

impl Aggregation {
    fn fold(self, acc: &mut Value, preimage: &Value) {
        let term: Value = match self {
            Aggregation::Xor => *preimage,
            Aggregation::HashedXor => {
                let mut h = Sha256::new();
                h.update(AGG_DOMAIN);
                h.update(preimage);
                h.finalize().into()
            }
        };
        for (a, t) in acc.iter_mut().zip(term.iter()) {
            *a ^= t;
        }
    }
}

#[derive(Debug, Clone)]
pub struct RandomnessRequest {
    pub created_at: u64,
    pub duration: u64,
    pub commit_deadline: u64,
    pub reveal_deadline: u64,
    aggregate: Value,
    reveal_count: u64,
}

impl RandomnessRequest {
    fn new(created_at: u64, duration: u64) -> Self {
        let commit_deadline = created_at.saturating_add(duration);
        let reveal_deadline = commit_deadline.saturating_add(duration);
        Self {
            created_at,
            duration,
            commit_deadline,
            reveal_deadline,
            aggregate: [0u8; 32],
            reveal_count: 0,
        }
    }

    pub fn phase(&self, now: u64) -> Phase {
        if now < self.commit_deadline {
            Phase::Commit
        } else if now < self.reveal_deadline {
            Phase::Reveal
        } else {
            Phase::Finalized
        }
    }

    pub fn reveal_count(&self) -> u64 {
        self.reveal_count
    }
}

/// (request, hash) -> revealed? bookkeeping. A commitment exists once and is
/// consumed at most once; nothing is ever cleared.
#[derive(Debug, Clone, Default)]
pub struct HashCommitStore {
    commits: HashMap<(RequestId, Hash), bool>,
}

impl HashCommitStore {
    /// Record a commitment. Returns false if it was already present
    /// (idempotent re-commit: the first insertion's state is kept).
    fn insert(&mut self, id: RequestId, hash: Hash) -> bool {
        match self.commits.entry((id, hash)) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(v) => {
                v.insert(false);
                true
            }
        }
    }

    /// None: never committed. Some(revealed): committed, possibly consumed.
    fn status(&self, id: RequestId, hash: &Hash) -> Option<bool> {
        self.commits.get(&(id, *hash)).copied()
    }

    fn mark_revealed(&mut self, id: RequestId, hash: &Hash) {
        if let Some(revealed) = self.commits.get_mut(&(id, *hash)) {
            *revealed = true;
        }
    }

    pub fn contains(&self, id: RequestId, hash: &Hash) -> bool {
        self.commits.contains_key(&(id, *hash))
    }
}

/// Request lifecycle owner. Ids are sequential starting at 1; requests are
/// never deleted and deadlines never move once set.
#[derive(Debug, Clone, Default)]
pub struct RandomnessOracle {
    requests: Vec<RandomnessRequest>,
    commits: HashCommitStore,
    aggregation: Aggregation,
}

impl RandomnessOracle {
    pub fn new(aggregation: Aggregation) -> Self {
        Self {
            requests: Vec::new(),
            commits: HashCommitStore::default(),
            aggregation,
        }
    }

    /// Open a new request with disjoint, contiguous commit and reveal windows
    /// of `duration` each. Intentionally open to any caller.
    pub fn request_randomness(&mut self, duration: u64, now: u64) -> Result<RequestId, OracleError> {
        if duration == 0 {
            return Err(OracleError::ZeroDuration);
        }
        self.requests.push(RandomnessRequest::new(now, duration));
        let id = self.requests.len() as RequestId;
        debug!(id, now, duration, "randomness requested");
        Ok(id)
    }

    /// Record a commitment hash. Only legal strictly before the commit
    /// deadline, so every hash is fixed before any preimage is visible.
    pub fn commit_randomness(
        &mut self,
        id: RequestId,
        hash: Hash,
        now: u64,
    ) -> Result<(), OracleError> {
        let request = self.get(id)?;
        if request.phase(now) != Phase::Commit {
            return Err(OracleError::CommitWindowClosed(id));
        }
        let fresh = self.commits.insert(id, hash);
        debug!(id, hash = %hex::encode(hash), fresh, "commitment recorded");
        Ok(())
    }

    /// Fold a committed preimage into the request's aggregate and consume its
    /// commitment. Only legal inside the reveal window.
    pub fn reveal_randomness(
        &mut self,
        id: RequestId,
        preimage: Value,
        now: u64,
    ) -> Result<(), OracleError> {
        let request = self.get(id)?;
        if request.phase(now) != Phase::Reveal {
            return Err(OracleError::RevealWindowNotOpen(id));
        }
        let hash = hash_preimage(&preimage);
        match self.commits.status(id, &hash) {
            None => return Err(OracleError::UnknownCommitment(id)),
            Some(true) => return Err(OracleError::AlreadyRevealed(id)),
            Some(false) => {}
        }

        self.commits.mark_revealed(id, &hash);
        let aggregation = self.aggregation;
        let request = &mut self.requests[(id - 1) as usize];
        aggregation.fold(&mut request.aggregate, &preimage);
        request.reveal_count += 1;
        debug!(id, reveals = request.reveal_count, "preimage revealed");
        Ok(())
    }

    /// The frozen aggregate, readable once the reveal window has passed and
    /// at least one preimage was revealed.
    pub fn read_randomness(&self, id: RequestId, now: u64) -> Result<Value, OracleError> {
        let request = self.get(id)?;
        if request.phase(now) != Phase::Finalized {
            return Err(OracleError::NotFinalized(id));
        }
        if request.reveal_count == 0 {
            return Err(OracleError::NoRevealOccurred(id));
        }
        Ok(request.aggregate)
    }

    pub fn phase(&self, id: RequestId, now: u64) -> Result<Phase, OracleError> {
        Ok(self.get(id)?.phase(now))
    }

    pub fn request(&self, id: RequestId) -> Option<&RandomnessRequest> {
        if id == 0 {
            return None;
        }
        self.requests.get((id - 1) as usize)
    }

    pub fn commitment_exists(&self, id: RequestId, hash: &Hash) -> bool {
        self.commits.contains(id, hash)
    }

    pub fn request_count(&self) -> u64 {
        self.requests.len() as u64
    }

    fn get(&self, id: RequestId) -> Result<&RandomnessRequest, OracleError> {
        self.request(id).ok_or(OracleError::UnknownRequest(id))
    }
}
