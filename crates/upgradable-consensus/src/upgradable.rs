// UPGRADABLE ENGINE
// Routes every consensus operation to the Clique or SystemContract engine,
// depending on which era the block's timestamp falls in.
//
// INVARIANTS:
// 1. Era selection depends only on the fork predicate and a timestamp
// 2. Batch results reach the caller in input order: every Clique result
//    before any SystemContract result
// 3. One abort signal covers both halves of a batch that crosses the fork
// 4. close() always closes both engines, whatever the first one returns

use crate::config::UpgradeConfig;
use crate::engine::{ConsensusEngine, HeaderVerification, RpcApi, SignerFn, SignerKind, VerifyResult};
use crate::error::ConsensusError;
use crate::fork::{Era, ForkPredicate};
use log::{debug, error, info, warn};
use num_bigint::BigUint;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use upgradable_core::{Address, Block, ChainHeaderReader, Hash, Header, Receipt, StateDb, Transaction};

/// Consensus engine spanning the one-time switch from Clique to
/// SystemContract.
///
/// Owns both engines for its whole lifetime; nothing else should hold them
/// mutably.
///
/// Batches that cross the fork are verified on the ambient Tokio runtime.
/// Without one, each header in such a batch fails with
/// [`ConsensusError::NoRuntime`].
pub struct UpgradableEngine {
    is_upgraded: ForkPredicate,
    clique: Arc<dyn ConsensusEngine>,
    system: Arc<dyn ConsensusEngine>,
    verify_buffer: Option<usize>,
}

impl UpgradableEngine {
    pub fn new(
        is_upgraded: ForkPredicate,
        clique: Arc<dyn ConsensusEngine>,
        system: Arc<dyn ConsensusEngine>,
    ) -> Self {
        UpgradableEngine {
            is_upgraded,
            clique,
            system,
            verify_buffer: None,
        }
    }

    pub fn from_config(
        config: &UpgradeConfig,
        clique: Arc<dyn ConsensusEngine>,
        system: Arc<dyn ConsensusEngine>,
    ) -> Self {
        UpgradableEngine {
            verify_buffer: config.verify_buffer,
            ..UpgradableEngine::new(config.fork_predicate(), clique, system)
        }
    }

    pub fn era(&self, time: u64) -> Era {
        self.is_upgraded.era(time)
    }

    pub fn engine(&self, era: Era) -> &Arc<dyn ConsensusEngine> {
        match era {
            Era::Clique => &self.clique,
            Era::SystemContract => &self.system,
        }
    }

    /// Engine governing the block with the given timestamp.
    pub fn choose_engine(&self, time: u64) -> &Arc<dyn ConsensusEngine> {
        self.engine(self.era(time))
    }

    pub fn fork_predicate(&self) -> &ForkPredicate {
        &self.is_upgraded
    }

    /// Inject signing keys into whichever engine accepts each signature kind.
    pub fn authorize(&self, signer: Address, clique_fn: SignerFn, system_fn: SignerFn) {
        inject_signer(&self.clique, SignerKind::Clique, signer, clique_fn);
        inject_signer(&self.system, SignerKind::SystemContract, signer, system_fn);
    }
}

fn inject_signer(engine: &Arc<dyn ConsensusEngine>, kind: SignerKind, signer: Address, sign_fn: SignerFn) {
    match engine.signer() {
        Some(slot) if slot.kind() == kind => {
            info!("Authorized {} signer {}", kind.as_str(), signer);
            slot.authorize(signer, sign_fn);
        }
        _ => debug!("Engine does not accept {} signers, skipping", kind.as_str()),
    }
}

impl ConsensusEngine for UpgradableEngine {
    fn author(&self, header: &Header) -> Result<Address, ConsensusError> {
        self.choose_engine(header.time).author(header)
    }

    fn verify_header(&self, chain: &dyn ChainHeaderReader, header: &Header, seal: bool) -> VerifyResult {
        self.choose_engine(header.time).verify_header(chain, header, seal)
    }

    fn verify_headers(
        &self,
        chain: Arc<dyn ChainHeaderReader>,
        headers: Vec<Header>,
        seals: Vec<bool>,
    ) -> HeaderVerification {
        let (first, last) = match (headers.first(), headers.last()) {
            (Some(first), Some(last)) => (self.era(first.time), self.era(last.time)),
            _ => return HeaderVerification::empty(),
        };

        if first == Era::SystemContract {
            return self.system.verify_headers(chain, headers, seals);
        }
        if last == Era::Clique {
            return self.clique.verify_headers(chain, headers, seals);
        }

        let total = headers.len();
        let split = match self.is_upgraded.split_index(&headers) {
            Ok(split) => split,
            Err(err) => {
                error!(
                    "Rejecting headers {}..={}: {}",
                    headers[0].number,
                    headers[total - 1].number,
                    err
                );
                return HeaderVerification::ready(vec![Err(err); total]);
            }
        };
        let Ok(runtime) = Handle::try_current() else {
            error!(
                "Cannot verify headers {}..={} across the fork outside a Tokio runtime",
                headers[0].number,
                headers[total - 1].number
            );
            return HeaderVerification::ready(vec![Err(ConsensusError::NoRuntime); total]);
        };
        debug!(
            "Header batch crosses the fork at block {}: {} clique, {} system_contract",
            headers[split].number,
            split,
            total - split
        );

        let mut clique_headers = headers;
        let system_headers = clique_headers.split_off(split);
        let mut clique_seals = seals;
        let system_seals = clique_seals.split_off(split.min(clique_seals.len()));

        // split > 0 because the first header is Clique-era.
        let Some(parent) = clique_headers.last().cloned() else {
            return self.system.verify_headers(chain, system_headers, system_seals);
        };

        let phases = vec![
            Phase {
                era: Era::Clique,
                expected: split,
                verification: self.clique.verify_headers(chain.clone(), clique_headers, clique_seals),
            },
            Phase {
                era: Era::SystemContract,
                expected: total - split,
                verification: self.system.verify_headers_from(chain, parent, system_headers, system_seals),
            },
        ];

        let abort = CancellationToken::new();
        let (tx, rx) = mpsc::channel(self.verify_buffer.unwrap_or(total).max(1));
        runtime.spawn(forward_phases(phases, tx, abort.clone()));
        HeaderVerification::new(Some(abort), rx)
    }

    fn verify_uncles(&self, chain: &dyn ChainHeaderReader, block: &Block) -> VerifyResult {
        self.choose_engine(block.time()).verify_uncles(chain, block)
    }

    fn prepare(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &mut Header,
        time_override: Option<u64>,
    ) -> VerifyResult {
        if let Some(time) = time_override {
            return self.choose_engine(time).prepare(chain, header, Some(time));
        }

        let parent = header
            .number
            .checked_sub(1)
            .and_then(|number| chain.get_header(&header.parent_hash, number))
            .ok_or(ConsensusError::UnknownAncestor)?;

        let parent_era = self.era(parent.time);
        let time = self.engine(parent_era).calc_timestamp(&parent);

        match (parent_era, self.era(time)) {
            // Pin the computed time so Clique cannot round across the fork.
            (Era::Clique, Era::Clique) => self.clique.prepare(chain, header, Some(time)),
            (Era::Clique, Era::SystemContract) => {
                info!(
                    "Preparing transition block {} at time {} with the system_contract engine",
                    header.number, time
                );
                self.system.prepare(chain, header, Some(time))
            }
            (Era::SystemContract, Era::SystemContract) => self.system.prepare(chain, header, None),
            (Era::SystemContract, Era::Clique) => {
                warn!(
                    "Computed time {} for block {} falls before the fork although parent time {} is after it, using parent time",
                    time, header.number, parent.time
                );
                self.system.prepare(chain, header, Some(parent.time))
            }
        }
    }

    fn calc_timestamp(&self, parent: &Header) -> u64 {
        self.choose_engine(parent.time).calc_timestamp(parent)
    }

    fn finalize(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &mut Header,
        state: &mut dyn StateDb,
        txs: &[Transaction],
        uncles: &[Header],
    ) {
        self.choose_engine(header.time).finalize(chain, header, state, txs, uncles)
    }

    fn finalize_and_assemble(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &mut Header,
        state: &mut dyn StateDb,
        txs: Vec<Transaction>,
        uncles: Vec<Header>,
        receipts: &[Receipt],
    ) -> Result<Block, ConsensusError> {
        self.choose_engine(header.time)
            .finalize_and_assemble(chain, header, state, txs, uncles, receipts)
    }

    fn seal(
        &self,
        chain: &dyn ChainHeaderReader,
        block: Block,
        results: mpsc::Sender<Block>,
        stop: CancellationToken,
    ) -> VerifyResult {
        self.choose_engine(block.time()).seal(chain, block, results, stop)
    }

    fn seal_hash(&self, header: &Header) -> Hash {
        self.choose_engine(header.time).seal_hash(header)
    }

    fn calc_difficulty(&self, chain: &dyn ChainHeaderReader, time: u64, parent: &Header) -> BigUint {
        self.choose_engine(time).calc_difficulty(chain, time, parent)
    }

    /// Both engines' APIs, whichever era is active: historical queries can
    /// target either one.
    fn apis(&self, chain: Arc<dyn ChainHeaderReader>) -> Vec<RpcApi> {
        let mut apis = self.clique.apis(chain.clone());
        apis.extend(self.system.apis(chain));
        apis
    }

    fn close(&self) -> VerifyResult {
        let clique = self.clique.close();
        let system = self.system.close();

        if let Err(err) = &clique {
            error!("Failed to close clique engine: {}", err);
        }
        if let Err(err) = &system {
            error!("Failed to close system_contract engine: {}", err);
        }
        clique.and(system)
    }
}

/// One engine's share of a batch that crosses the fork.
struct Phase {
    era: Era,
    expected: usize,
    verification: HeaderVerification,
}

/// Forward each phase's results in turn, stopping everything on abort or once
/// the caller drops the stream.
async fn forward_phases(mut phases: Vec<Phase>, results: mpsc::Sender<VerifyResult>, abort: CancellationToken) {
    let handles: Vec<CancellationToken> = phases
        .iter()
        .filter_map(|phase| phase.verification.abort_handle().cloned())
        .collect();
    let abort_all = || handles.iter().for_each(CancellationToken::cancel);

    for phase in phases.iter_mut() {
        let mut delivered = 0;
        while delivered < phase.expected {
            let next = tokio::select! {
                biased;
                _ = abort.cancelled() => {
                    debug!("Header verification aborted during {} phase", phase.era);
                    abort_all();
                    return;
                }
                _ = results.closed() => {
                    debug!("Header verification receiver dropped during {} phase", phase.era);
                    abort_all();
                    return;
                }
                next = phase.verification.next() => next,
            };

            let Some(result) = next else {
                warn!(
                    "{} verification closed after {} of {} results",
                    phase.era, delivered, phase.expected
                );
                break;
            };

            tokio::select! {
                biased;
                _ = abort.cancelled() => {
                    debug!("Header verification aborted during {} phase", phase.era);
                    abort_all();
                    return;
                }
                sent = results.send(result) => {
                    if sent.is_err() {
                        debug!("Header verification receiver dropped during {} phase", phase.era);
                        abort_all();
                        return;
                    }
                }
            }
            delivered += 1;
        }
    }
}
