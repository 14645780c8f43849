// CONSENSUS ERRORS
// One error type shared by every engine so that delegated failures pass
// through the upgradable engine unchanged.

use thiserror::Error;
use upgradable_core::Address;

/// Consensus engine errors.
///
/// Sub-engines return these directly; the upgradable engine never wraps or
/// rewrites them, so callers can match on the variant no matter which era
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsensusError {
    /// Parent (or other ancestor) header is not known to the chain reader
    #[error("unknown ancestor")]
    UnknownAncestor,

    #[error("unknown block")]
    UnknownBlock,

    /// Block timestamp is ahead of the local clock
    #[error("block in the future")]
    FutureBlock,

    #[error("invalid block number")]
    InvalidNumber,

    #[error("invalid timestamp")]
    InvalidTimestamp,

    #[error("invalid difficulty")]
    InvalidDifficulty,

    #[error("extra-data 32 byte vanity prefix missing")]
    MissingVanity,

    #[error("extra-data 65 byte signature suffix missing")]
    MissingSignature,

    #[error("unauthorized signer {0}")]
    UnauthorizedSigner(Address),

    #[error("uncles not allowed")]
    InvalidUncles,

    /// A batch in which the fork predicate flips back to the pre-upgrade
    /// engine after the transition.
    #[error("fork predicate is not monotonic at block {number}")]
    NonMonotonicFork { number: u64 },

    /// Concurrent batch verification was requested outside a Tokio runtime
    #[error("no async runtime for batch verification")]
    NoRuntime,

    #[error("engine shutdown failed: {0}")]
    Shutdown(String),

    #[error("consensus error: {0}")]
    Other(String),
}
