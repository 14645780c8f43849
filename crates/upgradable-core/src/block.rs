// BLOCKS AND HEADERS
// Header layout shared by the Clique and SystemContract eras
//
// INVARIANTS:
// 1. hash() commits to every header field, including the seal in `extra`
// 2. seal_hash() commits to every field except the trailing seal signature
// 3. A Block's tx_root, receipt_root and uncle_hash are derived, never set by hand

use crate::primitives::{keccak256, Address, Hash};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

/// Fixed number of extra-data prefix bytes reserved for signer vanity.
pub const EXTRA_VANITY: usize = 32;

/// Fixed number of extra-data suffix bytes reserved for the signer seal.
pub const EXTRA_SEAL: usize = 65;

/// Keccak-256 of an empty uncle list.
pub fn empty_uncle_hash() -> Hash {
    uncle_hash(&[])
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub nonce: u64,
    pub to: Option<Address>,
    pub value: u128,
    pub gas: u64,
    pub data: Vec<u8>,
}

impl Transaction {
    pub fn hash(&self) -> Hash {
        keccak256(encode(self))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: Hash,
    /// 1 for success, 0 for failure
    pub status: u64,
    pub cumulative_gas_used: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub parent_hash: Hash,
    pub uncle_hash: Hash,
    pub coinbase: Address,
    pub state_root: Hash,
    pub tx_root: Hash,
    pub receipt_root: Hash,
    pub difficulty: BigUint,
    pub number: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    /// Block timestamp (seconds since epoch)
    pub time: u64,
    pub extra: Vec<u8>,
    pub mix_digest: Hash,
    pub nonce: [u8; 8],
    pub base_fee: Option<u64>,
}

impl Default for Header {
    fn default() -> Self {
        Header {
            parent_hash: Hash::ZERO,
            uncle_hash: empty_uncle_hash(),
            coinbase: Address::ZERO,
            state_root: Hash::ZERO,
            tx_root: Hash::ZERO,
            receipt_root: Hash::ZERO,
            difficulty: BigUint::default(),
            number: 0,
            gas_limit: 0,
            gas_used: 0,
            time: 0,
            extra: Vec::new(),
            mix_digest: Hash::ZERO,
            nonce: [0u8; 8],
            base_fee: None,
        }
    }
}

impl Header {
    /// Build a child header linked to `parent` with the given timestamp.
    pub fn child_of(parent: &Header, time: u64) -> Self {
        Header {
            parent_hash: parent.hash(),
            number: parent.number.saturating_add(1),
            gas_limit: parent.gas_limit,
            time,
            ..Header::default()
        }
    }

    pub fn hash(&self) -> Hash {
        keccak256(encode(self))
    }

    /// Hash of the header without its seal signature: the digest a signer signs.
    pub fn seal_hash(&self) -> Hash {
        let mut unsealed = self.clone();
        if unsealed.extra.len() >= EXTRA_SEAL {
            unsealed.extra.truncate(unsealed.extra.len() - EXTRA_SEAL);
        }
        keccak256(encode(&unsealed))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
    pub uncles: Vec<Header>,
}

impl Block {
    /// Assemble a block, deriving the transaction, receipt and uncle commitments
    /// into the header.
    pub fn new(mut header: Header, transactions: Vec<Transaction>, uncles: Vec<Header>, receipts: &[Receipt]) -> Self {
        header.tx_root = transactions_root(&transactions);
        header.receipt_root = receipts_root(receipts);
        header.uncle_hash = uncle_hash(&uncles);
        Block { header, transactions, uncles }
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn time(&self) -> u64 {
        self.header.time
    }

    /// Replace the header, keeping the body. Used once a seal is applied.
    pub fn with_seal(self, header: Header) -> Self {
        Block { header, ..self }
    }
}

pub fn transactions_root(transactions: &[Transaction]) -> Hash {
    let hashes: Vec<Hash> = transactions.iter().map(Transaction::hash).collect();
    keccak256(encode(&hashes))
}

pub fn receipts_root(receipts: &[Receipt]) -> Hash {
    keccak256(encode(receipts))
}

pub fn uncle_hash(uncles: &[Header]) -> Hash {
    let hashes: Vec<Hash> = uncles.iter().map(Header::hash).collect();
    keccak256(encode(&hashes))
}

/// bincode encoding used as hash input. Infallible for the plain data types
/// in this module.
fn encode<T: Serialize + ?Sized>(value: &T) -> Vec<u8> {
    bincode::serialize(value).unwrap_or_default()
}
