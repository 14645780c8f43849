// Recording engine doubles shared by the integration tests.
#![allow(dead_code)]

use num_bigint::BigUint;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use upgradable_consensus::{
    Authorize, ConsensusEngine, ConsensusError, HeaderVerification, RpcApi, SignerFn, SignerKind,
    VerifyResult,
};
use upgradable_core::{
    keccak256, Address, Block, ChainHeaderReader, Hash, Header, MemoryChain, Receipt, StateDb,
    Transaction,
};

/// Every call an engine double received, with the arguments that matter for
/// routing assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Author(u64),
    VerifyHeader { number: u64, seal: bool },
    VerifyHeaders { numbers: Vec<u64>, seals: Vec<bool>, parent: Option<u64> },
    VerifyUncles(u64),
    Prepare { number: u64, time_override: Option<u64> },
    CalcTimestamp(u64),
    Finalize(u64),
    FinalizeAndAssemble(u64),
    Seal(u64),
    SealHash(u64),
    CalcDifficulty { time: u64 },
    Apis,
    Close,
    Authorize(Address),
}

pub struct RecordingEngine {
    pub name: &'static str,
    tag: u8,
    kind: SignerKind,
    accepts_signer: bool,
    period: u64,
    fixed_timestamp: Option<u64>,
    reject: HashSet<u64>,
    delay: Duration,
    stall_after: Option<usize>,
    close_error: Option<ConsensusError>,
    calls: Mutex<Vec<Call>>,
    signer: Mutex<Option<Address>>,
    aborted: Arc<AtomicBool>,
}

impl RecordingEngine {
    fn new(name: &'static str, tag: u8, kind: SignerKind) -> Self {
        RecordingEngine {
            name,
            tag,
            kind,
            accepts_signer: true,
            period: 10,
            fixed_timestamp: None,
            reject: HashSet::new(),
            delay: Duration::ZERO,
            stall_after: None,
            close_error: None,
            calls: Mutex::new(Vec::new()),
            signer: Mutex::new(None),
            aborted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn clique() -> Self {
        Self::new("clique", 0xc1, SignerKind::Clique)
    }

    pub fn system() -> Self {
        Self::new("system_contract", 0x5c, SignerKind::SystemContract)
    }

    pub fn with_period(mut self, period: u64) -> Self {
        self.period = period;
        self
    }

    /// calc_timestamp always returns `time`.
    pub fn with_timestamp(mut self, time: u64) -> Self {
        self.fixed_timestamp = Some(time);
        self
    }

    pub fn rejecting(mut self, numbers: impl IntoIterator<Item = u64>) -> Self {
        self.reject.extend(numbers);
        self
    }

    /// Wait this long before emitting each batch result.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Emit `n` batch results, then wait until aborted.
    pub fn stalling_after(mut self, n: usize) -> Self {
        self.stall_after = Some(n);
        self
    }

    pub fn failing_close(mut self, err: ConsensusError) -> Self {
        self.close_error = Some(err);
        self
    }

    pub fn without_signer(mut self) -> Self {
        self.accepts_signer = false;
        self
    }

    /// Same engine double, claiming the other signature kind.
    pub fn with_signer_kind(mut self, kind: SignerKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn author_address(&self) -> Address {
        Address([self.tag; 20])
    }

    pub fn difficulty(&self) -> BigUint {
        BigUint::from(self.tag)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    pub fn authorized_signer(&self) -> Option<Address> {
        *self.signer.lock()
    }

    pub fn was_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub fn rejection(&self, number: u64) -> ConsensusError {
        ConsensusError::Other(format!("{} rejected {}", self.name, number))
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    fn result_for(&self, header: &Header) -> VerifyResult {
        if self.reject.contains(&header.number) {
            Err(self.rejection(header.number))
        } else {
            Ok(())
        }
    }

    fn spawn_verification(&self, headers: &[Header]) -> HeaderVerification {
        let results: Vec<VerifyResult> = headers.iter().map(|h| self.result_for(h)).collect();
        let (tx, rx) = mpsc::channel(results.len().max(1));
        let abort = CancellationToken::new();
        let token = abort.clone();
        let aborted = self.aborted.clone();
        let delay = self.delay;
        let stall_after = self.stall_after;

        tokio::spawn(async move {
            for (i, result) in results.into_iter().enumerate() {
                if stall_after == Some(i) {
                    token.cancelled().await;
                    aborted.store(true, Ordering::SeqCst);
                    return;
                }
                tokio::select! {
                    _ = token.cancelled() => {
                        aborted.store(true, Ordering::SeqCst);
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                if tx.send(result).await.is_err() {
                    return;
                }
            }
        });
        HeaderVerification::new(Some(abort), rx)
    }
}

impl Authorize for RecordingEngine {
    fn kind(&self) -> SignerKind {
        self.kind
    }

    fn authorize(&self, signer: Address, _sign_fn: SignerFn) {
        self.record(Call::Authorize(signer));
        *self.signer.lock() = Some(signer);
    }
}

impl ConsensusEngine for RecordingEngine {
    fn author(&self, header: &Header) -> Result<Address, ConsensusError> {
        self.record(Call::Author(header.number));
        Ok(self.author_address())
    }

    fn verify_header(&self, _chain: &dyn ChainHeaderReader, header: &Header, seal: bool) -> VerifyResult {
        self.record(Call::VerifyHeader { number: header.number, seal });
        self.result_for(header)
    }

    fn verify_headers(
        &self,
        _chain: Arc<dyn ChainHeaderReader>,
        headers: Vec<Header>,
        seals: Vec<bool>,
    ) -> HeaderVerification {
        self.record(Call::VerifyHeaders {
            numbers: headers.iter().map(|h| h.number).collect(),
            seals,
            parent: None,
        });
        self.spawn_verification(&headers)
    }

    fn verify_headers_from(
        &self,
        _chain: Arc<dyn ChainHeaderReader>,
        parent: Header,
        headers: Vec<Header>,
        seals: Vec<bool>,
    ) -> HeaderVerification {
        self.record(Call::VerifyHeaders {
            numbers: headers.iter().map(|h| h.number).collect(),
            seals,
            parent: Some(parent.number),
        });
        self.spawn_verification(&headers)
    }

    fn verify_uncles(&self, _chain: &dyn ChainHeaderReader, block: &Block) -> VerifyResult {
        self.record(Call::VerifyUncles(block.number()));
        if block.uncles.is_empty() {
            Ok(())
        } else {
            Err(ConsensusError::InvalidUncles)
        }
    }

    fn prepare(
        &self,
        _chain: &dyn ChainHeaderReader,
        header: &mut Header,
        time_override: Option<u64>,
    ) -> VerifyResult {
        self.record(Call::Prepare { number: header.number, time_override });
        if let Some(time) = time_override {
            header.time = time;
        }
        header.difficulty = self.difficulty();
        header.extra = self.name.as_bytes().to_vec();
        Ok(())
    }

    fn calc_timestamp(&self, parent: &Header) -> u64 {
        self.record(Call::CalcTimestamp(parent.number));
        self.fixed_timestamp.unwrap_or(parent.time + self.period)
    }

    fn finalize(
        &self,
        _chain: &dyn ChainHeaderReader,
        header: &mut Header,
        state: &mut dyn StateDb,
        _txs: &[Transaction],
        _uncles: &[Header],
    ) {
        self.record(Call::Finalize(header.number));
        state.add_balance(self.author_address(), 1);
        header.state_root = state.intermediate_root();
    }

    fn finalize_and_assemble(
        &self,
        _chain: &dyn ChainHeaderReader,
        header: &mut Header,
        state: &mut dyn StateDb,
        txs: Vec<Transaction>,
        uncles: Vec<Header>,
        receipts: &[Receipt],
    ) -> Result<Block, ConsensusError> {
        self.record(Call::FinalizeAndAssemble(header.number));
        state.add_balance(self.author_address(), 1);
        header.state_root = state.intermediate_root();
        Ok(Block::new(header.clone(), txs, uncles, receipts))
    }

    fn seal(
        &self,
        _chain: &dyn ChainHeaderReader,
        block: Block,
        results: mpsc::Sender<Block>,
        stop: CancellationToken,
    ) -> VerifyResult {
        self.record(Call::Seal(block.number()));
        if stop.is_cancelled() {
            return Ok(());
        }
        let mut header = block.header.clone();
        header.extra.push(self.tag);
        results
            .try_send(block.with_seal(header))
            .map_err(|e| ConsensusError::Other(e.to_string()))
    }

    fn seal_hash(&self, header: &Header) -> Hash {
        self.record(Call::SealHash(header.number));
        keccak256([header.seal_hash().as_bytes(), &[self.tag]].concat())
    }

    fn calc_difficulty(&self, _chain: &dyn ChainHeaderReader, time: u64, _parent: &Header) -> BigUint {
        self.record(Call::CalcDifficulty { time });
        self.difficulty()
    }

    fn apis(&self, _chain: Arc<dyn ChainHeaderReader>) -> Vec<RpcApi> {
        self.record(Call::Apis);
        vec![RpcApi {
            namespace: self.name.to_string(),
            version: "1.0".to_string(),
            public: true,
            service: Arc::new(self.name),
        }]
    }

    fn close(&self) -> VerifyResult {
        self.record(Call::Close);
        match &self.close_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn signer(&self) -> Option<&dyn Authorize> {
        if self.accepts_signer {
            Some(self)
        } else {
            None
        }
    }
}

/// Genesis header at number 0.
pub fn genesis(time: u64) -> Header {
    Header {
        time,
        gas_limit: 30_000_000,
        ..Header::default()
    }
}

/// Headers 1..=times.len() chained onto `parent`.
pub fn chain_after(parent: &Header, times: &[u64]) -> Vec<Header> {
    let mut out: Vec<Header> = Vec::with_capacity(times.len());
    for time in times {
        let prev = out.last().unwrap_or(parent);
        let header = Header::child_of(prev, *time);
        out.push(header);
    }
    out
}

pub fn memory_chain(headers: impl IntoIterator<Item = Header>) -> Arc<dyn ChainHeaderReader> {
    Arc::new(MemoryChain::with_headers(headers))
}

pub fn noop_signer() -> SignerFn {
    Arc::new(|_: Address, _: &str, _: &[u8]| Ok::<_, ConsensusError>(vec![0u8; 65]))
}
