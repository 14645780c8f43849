//! Chain data model shared by the Clique, SystemContract and upgradable
//! consensus engines.

pub mod block;
pub mod chain;
pub mod primitives;
pub mod state;

pub use block::{Block, Header, Receipt, Transaction, EXTRA_SEAL, EXTRA_VANITY};
pub use chain::{ChainHeaderReader, MemoryChain, ParentOverlay};
pub use primitives::{keccak256, Address, Hash, ParseBytesError};
pub use state::{MemoryState, StateDb};
