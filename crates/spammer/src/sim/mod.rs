//! In-process simulated layer-2 chain.
//!
//! Stands in for a full node, coordinator contract and proof-capable wallet
//! so the harness can run end to end in a single process.
//!
//! # Model
//!
//! - Deposits are staged and only committed when a block is proposed.
//! - Submitted transactions are checked against the committed unspent set
//!   and against inputs of transactions already pending; conflicts are
//!   rejected as double spends.
//! - Outputs become visible to `get_utxos` only after the next proposal,
//!   so the unspent view lags behind submissions the way a real node does.
//! - The chain proposes only when it has pending work. An idle chain stays
//!   idle until something (such as the block turner's fallback deposit)
//!   gives it work.

mod wallet;

pub use wallet::SimWallet;

use crate::wallet::{ChainError, DepositNote, ProposalSource, ProposalStream};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use stressnet_types::{
    ChainEvent, GeneratedTx, Salt, SpendUnit, SubmitResponse, UtxoStatus, Wei, ZkAddress,
    ZkPayload,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Simulated chain parameters.
#[derive(Clone, Debug)]
pub struct SimConfig {
    /// How often the proposer checks for pending work.
    pub block_interval: Duration,

    /// Fraction of otherwise valid submissions rejected at random (0.0 to 1.0).
    pub reject_ratio: f64,

    /// Time spent producing a proof.
    pub prove_delay: Duration,

    /// Seed for the rejection RNG.
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            block_interval: Duration::from_secs(1),
            reject_ratio: 0.0,
            prove_delay: Duration::ZERO,
            seed: 12345,
        }
    }
}

impl SimConfig {
    pub fn with_block_interval(mut self, interval: Duration) -> Self {
        self.block_interval = interval;
        self
    }

    pub fn with_reject_ratio(mut self, ratio: f64) -> Self {
        self.reject_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    pub fn with_prove_delay(mut self, delay: Duration) -> Self {
        self.prove_delay = delay;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

#[derive(Debug)]
struct Ledger {
    /// Committed notes keyed by owner, then salt.
    notes: BTreeMap<ZkAddress, BTreeMap<Salt, SpendUnit>>,
    staged: Vec<SpendUnit>,
    pending: Vec<GeneratedTx>,
    pending_inputs: HashSet<(ZkAddress, Salt)>,
    history: Vec<ChainEvent>,
    proposal_num: u64,
    block_number: u64,
    deposits: u64,
    accepted: u64,
    rejected: u64,
    rng: ChaCha8Rng,
}

impl Ledger {
    fn is_unspent(&self, note: &SpendUnit) -> bool {
        self.notes
            .get(&note.owner)
            .and_then(|notes| notes.get(&note.salt))
            .is_some_and(|n| n.status == UtxoStatus::Unspent && n.value == note.value)
    }

    fn insert(&mut self, note: SpendUnit) {
        self.notes
            .entry(note.owner.clone())
            .or_default()
            .insert(note.salt.clone(), note.with_status(UtxoStatus::Unspent));
    }
}

/// Counters describing what the chain has processed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChainStats {
    pub proposals: u64,
    pub deposits: u64,
    pub accepted: u64,
    pub rejected: u64,
}

/// Simulated layer-2 chain shared by every simulated wallet.
pub struct SimulatedChain {
    config: SimConfig,
    ledger: Mutex<Ledger>,
    events: broadcast::Sender<ChainEvent>,
}

impl SimulatedChain {
    pub fn new(config: SimConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        let ledger = Ledger {
            notes: BTreeMap::new(),
            staged: Vec::new(),
            pending: Vec::new(),
            pending_inputs: HashSet::new(),
            history: Vec::new(),
            proposal_num: 0,
            block_number: 0,
            deposits: 0,
            accepted: 0,
            rejected: 0,
            rng: ChaCha8Rng::seed_from_u64(config.seed),
        };
        Arc::new(Self {
            config,
            ledger: Mutex::new(ledger),
            events,
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Wallet bound to a fresh account named `name`.
    pub fn wallet(self: &Arc<Self>, name: &str) -> SimWallet {
        SimWallet::new(self.clone(), name)
    }

    /// Stage a deposit; it is committed by the next proposal.
    pub(crate) fn stage_deposit(&self, owner: &ZkAddress, value: &Wei, note: Option<DepositNote>) {
        let mut ledger = self.ledger.lock();
        ledger.deposits += 1;
        let (recipient, salt) = match note {
            Some(note) => (note.recipient, note.salt),
            None => (owner.clone(), Salt::from(ledger.rng.gen::<u64>())),
        };
        ledger
            .staged
            .push(SpendUnit::new(recipient, salt, value.clone()));
    }

    pub(crate) fn staged_count(&self) -> u64 {
        self.ledger.lock().staged.len() as u64
    }

    /// Committed notes of `owner` with the given status, in salt order.
    pub fn notes(&self, owner: &ZkAddress, status: UtxoStatus) -> Vec<SpendUnit> {
        self.ledger
            .lock()
            .notes
            .get(owner)
            .map(|notes| {
                notes
                    .values()
                    .filter(|n| n.status == status)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn submit(&self, payload: &ZkPayload) -> Result<SubmitResponse, ChainError> {
        let tx: GeneratedTx = serde_json::from_slice(payload.as_bytes())
            .map_err(|e| ChainError::Decode(e.to_string()))?;

        let mut ledger = self.ledger.lock();
        for input in tx.inflow() {
            let key = (input.owner.clone(), input.salt.clone());
            if !ledger.is_unspent(input) || ledger.pending_inputs.contains(&key) {
                ledger.rejected += 1;
                debug!(salt = %input.salt, "Rejecting double spend");
                return Ok(SubmitResponse::rejected(
                    400,
                    format!("double spend of note {}", input.note_hash()),
                ));
            }
        }

        let ratio = self.config.reject_ratio;
        if ratio > 0.0 && ledger.rng.gen_bool(ratio) {
            ledger.rejected += 1;
            return Ok(SubmitResponse::rejected(500, "simulated rejection"));
        }

        for input in tx.inflow() {
            ledger
                .pending_inputs
                .insert((input.owner.clone(), input.salt.clone()));
        }
        ledger.pending.push(tx);
        ledger.accepted += 1;
        Ok(SubmitResponse::accepted())
    }

    /// Commit staged deposits and pending transactions into a new block.
    ///
    /// Returns `None` without proposing when there is no work.
    pub fn propose(&self) -> Option<ChainEvent> {
        let event = {
            let mut ledger = self.ledger.lock();
            if ledger.staged.is_empty() && ledger.pending.is_empty() {
                return None;
            }

            for note in std::mem::take(&mut ledger.staged) {
                ledger.insert(note);
            }
            for tx in std::mem::take(&mut ledger.pending) {
                for input in tx.inflow() {
                    if let Some(note) = ledger
                        .notes
                        .get_mut(&input.owner)
                        .and_then(|notes| notes.get_mut(&input.salt))
                    {
                        note.status = UtxoStatus::Spent;
                    }
                }
                for output in tx.outflow() {
                    ledger.insert(output.clone());
                }
            }
            ledger.pending_inputs.clear();

            ledger.proposal_num += 1;
            ledger.block_number += 1;
            let hash = blake3::hash(&ledger.proposal_num.to_be_bytes());
            let event = ChainEvent {
                proposal_num: ledger.proposal_num,
                block_hash: format!("0x{}", hash.to_hex()),
                block_number: ledger.block_number,
            };
            ledger.history.push(event.clone());
            // Sent under the lock so a subscriber sees each block either in
            // its history snapshot or on its receiver, never both. No
            // receivers is fine; history covers late subscribers.
            let _ = self.events.send(event.clone());
            event
        };

        trace!(proposal = event.proposal_num, block = event.block_number, "Block proposed");
        Some(event)
    }

    /// Propose on every block interval until cancelled.
    pub fn spawn_proposer(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let chain = self.clone();
        tokio::spawn(async move {
            info!(interval = ?chain.config.block_interval, "Simulated proposer started");
            let mut ticker = tokio::time::interval(chain.config.block_interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        chain.propose();
                    }
                }
            }
        })
    }

    pub fn stats(&self) -> ChainStats {
        let ledger = self.ledger.lock();
        ChainStats {
            proposals: ledger.proposal_num,
            deposits: ledger.deposits,
            accepted: ledger.accepted,
            rejected: ledger.rejected,
        }
    }
}

#[async_trait]
impl ProposalSource for SimulatedChain {
    async fn subscribe(&self, from_block: u64) -> Result<ProposalStream, ChainError> {
        // Snapshot and subscribe under the lock that `propose` sends under.
        let (past, receiver) = {
            let ledger = self.ledger.lock();
            let past: Vec<_> = ledger
                .history
                .iter()
                .filter(|e| e.block_number >= from_block)
                .cloned()
                .collect();
            (past, self.events.subscribe())
        };

        // Live events are only delivered past the last replayed block.
        let next_block = past.last().map_or(from_block, |e| e.block_number + 1);
        let live = stream::unfold((receiver, next_block), |(mut receiver, next_block)| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) if event.block_number < next_block => {
                        trace!(block = event.block_number, "Skipping already delivered proposal");
                    }
                    Ok(event) => {
                        let next = event.block_number + 1;
                        return Some((event, (receiver, next)));
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Proposal subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(stream::iter(past).chain(live).boxed())
    }
}
