// FORK SCHEDULE
// Decides which consensus era governs a block, from its timestamp alone
//
// INVARIANTS:
// 1. The predicate is pure: same timestamp, same answer, on every node
// 2. It is assumed monotonic: once true at t, true for every t' > t
// 3. It is never mutated after construction

use crate::error::ConsensusError;
use std::fmt;
use std::sync::Arc;
use upgradable_core::Header;

/// The two consensus eras a chain passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Era {
    /// Proof-of-authority with rotating signers
    Clique,

    /// Signer read from an on-chain system contract
    SystemContract,
}

impl Era {
    pub fn as_str(&self) -> &'static str {
        match self {
            Era::Clique => "clique",
            Era::SystemContract => "system_contract",
        }
    }
}

impl fmt::Display for Era {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `is_upgraded(timestamp)`: true once the SystemContract era is active.
#[derive(Clone)]
pub struct ForkPredicate(Arc<dyn Fn(u64) -> bool + Send + Sync>);

impl ForkPredicate {
    pub fn new(f: impl Fn(u64) -> bool + Send + Sync + 'static) -> Self {
        ForkPredicate(Arc::new(f))
    }

    /// Upgraded at and after `activation` (inclusive).
    pub fn at_timestamp(activation: u64) -> Self {
        ForkPredicate::new(move |time| time >= activation)
    }

    /// Never upgraded: the chain stays on Clique.
    pub fn never() -> Self {
        ForkPredicate::new(|_| false)
    }

    pub fn is_upgraded(&self, time: u64) -> bool {
        (self.0)(time)
    }

    pub fn era(&self, time: u64) -> Era {
        if self.is_upgraded(time) {
            Era::SystemContract
        } else {
            Era::Clique
        }
    }

    /// Index of the first header governed by SystemContract, or
    /// `headers.len()` if there is none.
    ///
    /// Fails if a Clique-era header follows the transition.
    pub fn split_index(&self, headers: &[Header]) -> Result<usize, ConsensusError> {
        let split = headers
            .iter()
            .position(|h| self.is_upgraded(h.time))
            .unwrap_or(headers.len());
        match headers[split..].iter().find(|h| !self.is_upgraded(h.time)) {
            Some(offender) => Err(ConsensusError::NonMonotonicFork { number: offender.number }),
            None => Ok(split),
        }
    }
}

impl fmt::Debug for ForkPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ForkPredicate(..)")
    }
}
