// STATE ACCESS
// Mutable world-state capability handed to engines during finalization

use crate::primitives::{keccak256, Address, Hash};
use std::collections::BTreeMap;

/// World-state operations an engine may perform while finalizing a block.
pub trait StateDb: Send {
    fn get_state(&self, address: &Address, key: &Hash) -> Hash;

    fn set_state(&mut self, address: Address, key: Hash, value: Hash);

    fn balance(&self, address: &Address) -> u128;

    fn add_balance(&mut self, address: Address, amount: u128);

    /// Commitment to the current state, written into the header's state root.
    fn intermediate_root(&mut self) -> Hash;
}

/// Ordered in-memory state. The root is a digest over every entry, so two
/// states with the same contents always share a root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryState {
    storage: BTreeMap<(Address, Hash), Hash>,
    balances: BTreeMap<Address, u128>,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateDb for MemoryState {
    fn get_state(&self, address: &Address, key: &Hash) -> Hash {
        self.storage.get(&(*address, *key)).copied().unwrap_or(Hash::ZERO)
    }

    fn set_state(&mut self, address: Address, key: Hash, value: Hash) {
        if value.is_zero() {
            self.storage.remove(&(address, key));
        } else {
            self.storage.insert((address, key), value);
        }
    }

    fn balance(&self, address: &Address) -> u128 {
        self.balances.get(address).copied().unwrap_or_default()
    }

    fn add_balance(&mut self, address: Address, amount: u128) {
        let entry = self.balances.entry(address).or_default();
        *entry = entry.saturating_add(amount);
    }

    fn intermediate_root(&mut self) -> Hash {
        let mut buf = Vec::new();
        for ((address, key), value) in &self.storage {
            buf.extend_from_slice(address.as_bytes());
            buf.extend_from_slice(key.as_bytes());
            buf.extend_from_slice(value.as_bytes());
        }
        for (address, balance) in &self.balances {
            buf.extend_from_slice(address.as_bytes());
            buf.extend_from_slice(&balance.to_be_bytes());
        }
        keccak256(buf)
    }
}
