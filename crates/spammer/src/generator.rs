//! Per-participant transaction generator.
//!
//! # Lifecycle
//!
//! ```text
//! Registering ──► Depositing ──► AwaitingActivation ──► Active ──► Stopped
//! ```
//!
//! - **Depositing**: one funding deposit to the participant's own address.
//!   A failed deposit is fatal; the participant cannot generate without it.
//! - **AwaitingActivation**: polls the staging pool until the deposit has
//!   been committed, registers with the coordinator, then starts the
//!   submission worker and its queue scheduler.
//! - **Active**: each iteration waits out backpressure, picks an unused
//!   input, builds and shields a self-transfer, marks the input consumed
//!   and enqueues the job. Recoverable failures are logged and retried on a
//!   later iteration.
//! - **Stopped**: entered after [`GeneratorHandle::stop`]. The flag is
//!   checked at the top of each iteration; queued jobs are left to the worker.

use crate::builder::TransferBuilder;
use crate::client::{CoordinatorClient, RegisterRequest};
use crate::config::{ConfigError, GeneratorConfig};
use crate::queue::{JobQueue, QueueScheduler};
use crate::state::ParticipantState;
use crate::stats::SpammerStats;
use crate::wallet::{ChainError, DepositNote, Layer2Wallet};
use crate::worker::SubmissionWorker;
use std::sync::Arc;
use std::time::Duration;
use stressnet_types::{Salt, ShieldedJob, UtxoStatus};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Where a generator is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorPhase {
    Registering,
    Depositing,
    AwaitingActivation,
    Active,
    Stopped,
}

/// Result of one generation iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The participant has been stopped.
    Stopped,
    /// Pipeline depth at or above the limit; nothing was generated.
    Throttled { current_txs: u64 },
    /// The coordinator or wallet could not be read.
    Unavailable,
    /// The wallet has no unspent notes.
    NoUtxos,
    /// Every unspent note is already consumed.
    Exhausted,
    /// Building, shielding or enqueueing failed; the input stays free.
    Skipped,
    /// A job spending `salt` was enqueued.
    Enqueued { salt: Salt, job_id: u64 },
}

/// Cloneable handle for stopping a running generator.
#[derive(Clone, Debug)]
pub struct GeneratorHandle {
    state: Arc<ParticipantState>,
}

impl GeneratorHandle {
    pub fn stop(&self) {
        info!(participant = self.state.id(), "Stopping generator");
        self.state.stop();
    }
}

/// Generates self-transfers for one participant.
pub struct Generator {
    config: GeneratorConfig,
    wallet: Arc<dyn Layer2Wallet>,
    coordinator: Arc<dyn CoordinatorClient>,
    queue: Arc<dyn JobQueue>,
    state: Arc<ParticipantState>,
    stats: Arc<SpammerStats>,
    builder: TransferBuilder,
    phase: GeneratorPhase,
    tasks: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl Generator {
    pub fn new(
        config: GeneratorConfig,
        wallet: Arc<dyn Layer2Wallet>,
        coordinator: Arc<dyn CoordinatorClient>,
        queue: Arc<dyn JobQueue>,
        stats: Arc<SpammerStats>,
    ) -> Result<Self, GeneratorError> {
        config.validate()?;

        let builder = TransferBuilder::new(wallet.zk_address().clone(), config.fee_per_byte.clone())
            .with_fee_floor(config.fee_floor.clone())
            .with_policy(config.amount_policy);

        Ok(Self {
            state: Arc::new(ParticipantState::new(config.id)),
            config,
            wallet,
            coordinator,
            queue,
            stats,
            builder,
            phase: GeneratorPhase::Registering,
            tasks: Vec::new(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> u32 {
        self.config.id
    }

    pub fn phase(&self) -> GeneratorPhase {
        self.phase
    }

    pub fn state(&self) -> &Arc<ParticipantState> {
        &self.state
    }

    pub fn handle(&self) -> GeneratorHandle {
        GeneratorHandle {
            state: self.state.clone(),
        }
    }

    /// Drive the full lifecycle until stopped.
    pub async fn run(&mut self) -> Result<(), GeneratorError> {
        self.deposit().await?;

        if !self.await_activation().await {
            self.phase = GeneratorPhase::Stopped;
            return Ok(());
        }

        self.start_worker();

        while self.state.is_active() {
            let outcome = self.step().await;
            if let Some(delay) = self.backoff_for(&outcome) {
                tokio::time::sleep(delay).await;
            }
        }

        self.phase = GeneratorPhase::Stopped;
        info!(participant = self.id(), "Generator stopped");
        Ok(())
    }

    /// Send the funding deposit.
    pub async fn deposit(&mut self) -> Result<(), GeneratorError> {
        self.phase = GeneratorPhase::Depositing;

        let note = DepositNote {
            recipient: self.wallet.zk_address().clone(),
            salt: self.config.deposit_salt.clone(),
        };
        if let Err(e) = self
            .wallet
            .deposit_ether(&self.config.deposit_value, &self.config.deposit_fee, Some(note))
            .await
        {
            error!(participant = self.id(), error = %e, "Deposit failed");
            return Err(GeneratorError::Deposit(e));
        }

        info!(
            participant = self.id(),
            value = %self.config.deposit_value,
            "Deposit tx sent"
        );
        Ok(())
    }

    /// Wait for the deposit to be committed, then register and activate.
    ///
    /// Returns false if the participant was stopped first.
    pub async fn await_activation(&mut self) -> bool {
        self.phase = GeneratorPhase::AwaitingActivation;

        loop {
            tokio::time::sleep(self.config.activation_poll).await;
            if self.state.is_stopped() {
                return false;
            }

            match self.wallet.staged_deposits_merged().await {
                Ok(0) => break,
                Ok(merged) => debug!(participant = self.id(), merged, "Deposit still staged"),
                Err(e) => warn!(participant = self.id(), error = %e, "Failed to read staged deposits"),
            }
        }

        let request = RegisterRequest::wallet(
            self.config.id,
            self.wallet.eth_address(),
            &self.config.fee_per_byte,
        );
        match self.coordinator.register(&request).await {
            Ok(()) => info!(participant = self.id(), "Deposit processed, registered with coordinator"),
            Err(e) => warn!(participant = self.id(), error = %e, "Failed to register with coordinator"),
        }

        self.state.activate();
        self.phase = GeneratorPhase::Active;
        true
    }

    /// Worker bound to this participant's queue and state.
    pub fn worker(&self) -> SubmissionWorker {
        SubmissionWorker::new(
            self.config.queue_name(),
            self.queue.clone(),
            self.wallet.clone(),
            self.state.clone(),
            self.stats.clone(),
            self.config.worker.clone(),
        )
    }

    /// Spawn the submission worker and its queue scheduler. Idempotent.
    pub fn start_worker(&mut self) {
        if !self.tasks.is_empty() {
            return;
        }

        let worker = self.worker();
        info!(queue = %worker.queue_name(), "Starting worker");
        self.tasks.push(tokio::spawn(worker.run(self.cancel.child_token())));

        let scheduler = QueueScheduler::new(
            self.queue.clone(),
            self.config.queue_name(),
            self.config.worker.scheduler_interval,
        );
        self.tasks
            .push(tokio::spawn(scheduler.run(self.cancel.child_token())));
    }

    /// One iteration of the generation loop.
    pub async fn step(&mut self) -> StepOutcome {
        if !self.state.is_active() {
            return StepOutcome::Stopped;
        }

        let current_txs = match self.coordinator.txs_in_queues().await {
            Ok(n) => n,
            Err(e) => {
                warn!(participant = self.id(), error = %e, "Failed to read pipeline depth");
                return StepOutcome::Unavailable;
            }
        };
        if current_txs >= self.config.main_queue_limit {
            self.stats.record_throttled();
            return StepOutcome::Throttled { current_txs };
        }
        debug!(participant = self.id(), current_txs, "Current job count");

        let unspent = match self.wallet.get_utxos(UtxoStatus::Unspent).await {
            Ok(unspent) => unspent,
            Err(e) => {
                warn!(participant = self.id(), error = %e, "Failed to read unspent notes");
                return StepOutcome::Unavailable;
            }
        };
        if unspent.is_empty() {
            debug!(participant = self.id(), "No spendable note, waiting");
            return StepOutcome::NoUtxos;
        }

        let Some(input) = self.state.select_input(&unspent) else {
            debug!(participant = self.id(), "All unspent notes consumed, waiting");
            return StepOutcome::Exhausted;
        };

        let tx = match self.builder.build(&input) {
            Ok(tx) => tx,
            Err(e) => {
                warn!(participant = self.id(), salt = %input.salt, error = %e, "Failed to build transaction");
                self.stats.record_build_failure();
                return StepOutcome::Skipped;
            }
        };
        debug!(
            participant = self.id(),
            input = %input.note_hash(),
            salt = %input.salt,
            output_salt = %input.salt.left(),
            fee = %tx.implied_fee(),
            "Created zktx"
        );
        self.stats.record_generated();

        let zk_tx = match self.wallet.shield_tx(&tx).await {
            Ok(zk_tx) => zk_tx,
            Err(e) => {
                error!(participant = self.id(), salt = %input.salt, error = %e, "Failed to shield transaction");
                self.stats.record_build_failure();
                return StepOutcome::Skipped;
            }
        };
        if zk_tx.is_empty() {
            error!(participant = self.id(), salt = %input.salt, "Shielding returned an empty proof");
            self.stats.record_build_failure();
            return StepOutcome::Skipped;
        }
        debug!(participant = self.id(), salt = %input.salt, proof_bytes = zk_tx.len(), "Shielded zktx");

        let salt = input.salt;
        self.state.mark_used(salt.clone());

        match self
            .queue
            .add(&self.config.queue_name(), ShieldedJob::new(tx, zk_tx))
            .await
        {
            Ok(job_id) => {
                self.stats.record_enqueued();
                StepOutcome::Enqueued { salt, job_id }
            }
            Err(e) => {
                error!(participant = self.id(), salt = %salt, error = %e, "Failed to enqueue job");
                self.state.unlock(std::slice::from_ref(&salt));
                StepOutcome::Skipped
            }
        }
    }

    /// Delay before the next iteration, if any.
    fn backoff_for(&self, outcome: &StepOutcome) -> Option<Duration> {
        match outcome {
            StepOutcome::Enqueued { .. } | StepOutcome::Stopped => None,
            StepOutcome::Throttled { .. } | StepOutcome::Unavailable | StepOutcome::Skipped => {
                Some(self.config.throttle_poll)
            }
            StepOutcome::NoUtxos | StepOutcome::Exhausted => Some(self.config.idle_backoff),
        }
    }

    /// Stop generating and shut the worker and scheduler down.
    pub async fn shutdown(mut self) {
        self.state.stop();
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(participant = self.config.id, error = %e, "Worker task panicked");
            }
        }
    }
}

/// Errors that end a generator.
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("Invalid generator configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Deposit transaction failed: {0}")]
    Deposit(ChainError),
}
