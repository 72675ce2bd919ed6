// Commit-reveal randomness + proof-gated weighted draws.
// Deterministic, in-memory, audit-first.

pub mod config;
pub mod draw;
pub mod index;
pub mod merkle;
pub mod oracle;
pub mod registry;

/// Sha256 output.
pub type Hash = [u8; 32];

/// Opaque 32-byte member identity.
pub type Address = [u8; 32];

/// A revealed preimage or an aggregate randomness word.
pub type Value = [u8; 32];

pub const ZERO_HASH: Hash = [0u8; 32];

// No randomness or wall clock access; time is injected explicitly as `now`
// on every time-sensitive call and read at most once per call.

/*
Intentionally avoids:
- async
- threads
- global mutable state
- external IO
*/
