// CONSENSUS ENGINE TRAIT
// Unified interface for the Clique era, the SystemContract era and the
// upgradable engine that routes between them.
//
// INVARIANTS:
// 1. verify_headers delivers at most one result per input header, in input order
// 2. Once a verification's abort handle is cancelled, no further results are sent
// 3. Engines never retry; every error goes straight back to the caller

use crate::error::ConsensusError;
use num_bigint::BigUint;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use upgradable_core::{
    Address, Block, ChainHeaderReader, Hash, Header, ParentOverlay, Receipt, StateDb, Transaction,
};

/// Outcome of verifying a single header.
pub type VerifyResult = Result<(), ConsensusError>;

/// Signing callback: `(signer, mime_type, message) -> signature`.
pub type SignerFn = Arc<dyn Fn(Address, &str, &[u8]) -> Result<Vec<u8>, ConsensusError> + Send + Sync>;

/// Which kind of sealing signature an engine accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignerKind {
    Clique,
    SystemContract,
}

impl SignerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignerKind::Clique => "clique",
            SignerKind::SystemContract => "system_contract",
        }
    }
}

/// Optional capability: accept a local signing key for sealing.
pub trait Authorize: Send + Sync {
    /// Signature kind this engine seals with.
    fn kind(&self) -> SignerKind;

    /// Inject the signer address and signing callback.
    fn authorize(&self, signer: Address, sign_fn: SignerFn);
}

/// An RPC namespace exposed by an engine.
#[derive(Clone)]
pub struct RpcApi {
    pub namespace: String,
    pub version: String,
    pub public: bool,
    pub service: Arc<dyn Any + Send + Sync>,
}

impl fmt::Debug for RpcApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcApi")
            .field("namespace", &self.namespace)
            .field("version", &self.version)
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// Handle to an in-flight batch header verification.
///
/// Results arrive in the order the headers were submitted. The stream closes
/// either once every result was delivered or after the verification is
/// aborted; a caller tells the two apart by counting results.
#[derive(Debug)]
pub struct HeaderVerification {
    abort: Option<CancellationToken>,
    results: mpsc::Receiver<VerifyResult>,
}

impl HeaderVerification {
    pub fn new(abort: Option<CancellationToken>, results: mpsc::Receiver<VerifyResult>) -> Self {
        HeaderVerification { abort, results }
    }

    /// An already-drained verification with no abort handle.
    pub fn empty() -> Self {
        let (_, results) = mpsc::channel(1);
        HeaderVerification { abort: None, results }
    }

    /// A verification whose results are all known up front.
    pub fn ready(results: Vec<VerifyResult>) -> Self {
        let (tx, rx) = mpsc::channel(results.len().max(1));
        for result in results {
            // Capacity covers every result.
            let _ = tx.try_send(result);
        }
        HeaderVerification { abort: None, results: rx }
    }

    /// Signal abort. A no-op when there is nothing to abort.
    pub fn abort(&self) {
        if let Some(abort) = &self.abort {
            abort.cancel();
        }
    }

    pub fn abort_handle(&self) -> Option<&CancellationToken> {
        self.abort.as_ref()
    }

    /// Next result, or `None` once the stream is closed.
    pub async fn next(&mut self) -> Option<VerifyResult> {
        self.results.recv().await
    }

    /// Drain every remaining result.
    pub async fn collect(mut self) -> Vec<VerifyResult> {
        let mut out = Vec::new();
        while let Some(result) = self.results.recv().await {
            out.push(result);
        }
        out
    }

    pub fn into_parts(self) -> (Option<CancellationToken>, mpsc::Receiver<VerifyResult>) {
        (self.abort, self.results)
    }
}

/// Consensus engine capability set consumed by the block-processing pipeline.
pub trait ConsensusEngine: Send + Sync {
    /// Address of the account that sealed the header.
    fn author(&self, header: &Header) -> Result<Address, ConsensusError>;

    fn verify_header(&self, chain: &dyn ChainHeaderReader, header: &Header, seal: bool) -> VerifyResult;

    /// Verify a contiguous batch of headers concurrently.
    ///
    /// `seals[i]` says whether the seal of `headers[i]` must be checked.
    /// Implementations spawn onto the ambient Tokio runtime.
    fn verify_headers(
        &self,
        chain: Arc<dyn ChainHeaderReader>,
        headers: Vec<Header>,
        seals: Vec<bool>,
    ) -> HeaderVerification;

    /// Batch verification whose first header's parent is `parent`, which may
    /// not be stored in the chain yet.
    fn verify_headers_from(
        &self,
        chain: Arc<dyn ChainHeaderReader>,
        parent: Header,
        headers: Vec<Header>,
        seals: Vec<bool>,
    ) -> HeaderVerification {
        self.verify_headers(Arc::new(ParentOverlay::new(chain, parent)), headers, seals)
    }

    fn verify_uncles(&self, chain: &dyn ChainHeaderReader, block: &Block) -> VerifyResult;

    /// Fill in the consensus fields of an unsealed header.
    ///
    /// With `time_override` set, the header takes exactly that timestamp.
    fn prepare(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &mut Header,
        time_override: Option<u64>,
    ) -> VerifyResult;

    /// Timestamp this engine would give the child of `parent`.
    fn calc_timestamp(&self, parent: &Header) -> u64;

    /// Apply post-transaction consensus rules (rewards, system calls) to
    /// `state`, updating `header` in place.
    fn finalize(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &mut Header,
        state: &mut dyn StateDb,
        txs: &[Transaction],
        uncles: &[Header],
    );

    /// Finalize and assemble the final block.
    fn finalize_and_assemble(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &mut Header,
        state: &mut dyn StateDb,
        txs: Vec<Transaction>,
        uncles: Vec<Header>,
        receipts: &[Receipt],
    ) -> Result<Block, ConsensusError>;

    /// Seal `block`, sending the sealed block on `results` unless `stop`
    /// fires first.
    fn seal(
        &self,
        chain: &dyn ChainHeaderReader,
        block: Block,
        results: mpsc::Sender<Block>,
        stop: CancellationToken,
    ) -> VerifyResult;

    fn seal_hash(&self, header: &Header) -> Hash;

    fn calc_difficulty(&self, chain: &dyn ChainHeaderReader, time: u64, parent: &Header) -> BigUint;

    fn apis(&self, chain: Arc<dyn ChainHeaderReader>) -> Vec<RpcApi>;

    /// Release background resources.
    fn close(&self) -> VerifyResult;

    /// Signer injection, for engines that seal with a local key.
    fn signer(&self) -> Option<&dyn Authorize> {
        None
    }
}
