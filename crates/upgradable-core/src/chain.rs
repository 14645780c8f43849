// CHAIN READER
// Read-only access to ancestor headers, as consumed by consensus engines
//
// INVARIANTS:
// 1. get_header only returns a header whose hash AND number both match
// 2. ParentOverlay never hides a header the inner reader would return

use crate::block::Header;
use crate::primitives::Hash;
use log::trace;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Header lookup capability provided by the node.
pub trait ChainHeaderReader: Send + Sync {
    /// Current head of the canonical chain, if any.
    fn current_header(&self) -> Option<Header>;

    /// Header by hash and number.
    fn get_header(&self, hash: &Hash, number: u64) -> Option<Header>;

    /// Canonical header at `number`.
    fn get_header_by_number(&self, number: u64) -> Option<Header>;

    fn get_header_by_hash(&self, hash: &Hash) -> Option<Header>;
}

/// Chain reader that knows about one header the node may not have stored yet.
///
/// Used when a batch of headers is verified in pieces: the last header of an
/// earlier piece is the parent of the next piece but may still be in flight.
pub struct ParentOverlay {
    inner: Arc<dyn ChainHeaderReader>,
    parent: Header,
    parent_hash: Hash,
}

impl ParentOverlay {
    pub fn new(inner: Arc<dyn ChainHeaderReader>, parent: Header) -> Self {
        let parent_hash = parent.hash();
        ParentOverlay { inner, parent, parent_hash }
    }

    pub fn parent(&self) -> &Header {
        &self.parent
    }
}

impl ChainHeaderReader for ParentOverlay {
    fn current_header(&self) -> Option<Header> {
        self.inner.current_header()
    }

    fn get_header(&self, hash: &Hash, number: u64) -> Option<Header> {
        if *hash == self.parent_hash && number == self.parent.number {
            trace!("Serving in-flight parent {} from overlay", number);
            return Some(self.parent.clone());
        }
        self.inner.get_header(hash, number)
    }

    fn get_header_by_number(&self, number: u64) -> Option<Header> {
        self.inner
            .get_header_by_number(number)
            .or_else(|| (number == self.parent.number).then(|| self.parent.clone()))
    }

    fn get_header_by_hash(&self, hash: &Hash) -> Option<Header> {
        if *hash == self.parent_hash {
            return Some(self.parent.clone());
        }
        self.inner.get_header_by_hash(hash)
    }
}

/// In-memory canonical chain.
#[derive(Default)]
pub struct MemoryChain {
    inner: RwLock<MemoryChainInner>,
}

#[derive(Default)]
struct MemoryChainInner {
    by_hash: HashMap<Hash, Header>,
    canonical: HashMap<u64, Hash>,
    head: Option<Hash>,
}

impl MemoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a chain from headers, making the last one the head.
    pub fn with_headers(headers: impl IntoIterator<Item = Header>) -> Self {
        let chain = Self::new();
        for header in headers {
            chain.insert(header);
        }
        chain
    }

    /// Insert a header as canonical at its number and advance the head if it
    /// is the highest seen.
    pub fn insert(&self, header: Header) {
        let hash = header.hash();
        let mut inner = self.inner.write();
        let is_new_head = match inner.head.and_then(|h| inner.by_hash.get(&h)) {
            Some(head) => header.number >= head.number,
            None => true,
        };
        inner.canonical.insert(header.number, hash);
        inner.by_hash.insert(hash, header);
        if is_new_head {
            inner.head = Some(hash);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ChainHeaderReader for MemoryChain {
    fn current_header(&self) -> Option<Header> {
        let inner = self.inner.read();
        inner.head.and_then(|h| inner.by_hash.get(&h).cloned())
    }

    fn get_header(&self, hash: &Hash, number: u64) -> Option<Header> {
        self.inner
            .read()
            .by_hash
            .get(hash)
            .filter(|h| h.number == number)
            .cloned()
    }

    fn get_header_by_number(&self, number: u64) -> Option<Header> {
        let inner = self.inner.read();
        inner.canonical.get(&number).and_then(|h| inner.by_hash.get(h).cloned())
    }

    fn get_header_by_hash(&self, hash: &Hash) -> Option<Header> {
        self.inner.read().by_hash.get(hash).cloned()
    }
}
