//! Submission worker: forwards queued jobs to the network.
//!
//! One worker runs per participant, bound to that participant's private
//! queue, and processes one job at a time. A rejected job releases its input
//! salts back to the participant's allocator and is marked failed; the
//! worker then carries on with the next job.

use crate::config::WorkerConfig;
use crate::queue::{JobQueue, QueuedJob};
use crate::state::ParticipantState;
use crate::stats::SpammerStats;
use crate::wallet::{ChainError, Layer2Wallet};
use std::sync::Arc;
use std::time::Instant;
use stressnet_types::ShieldedJob;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Consumes one participant's private queue.
pub struct SubmissionWorker {
    queue_name: String,
    queue: Arc<dyn JobQueue>,
    wallet: Arc<dyn Layer2Wallet>,
    state: Arc<ParticipantState>,
    stats: Arc<SpammerStats>,
    config: WorkerConfig,
}

impl SubmissionWorker {
    pub fn new(
        queue_name: impl Into<String>,
        queue: Arc<dyn JobQueue>,
        wallet: Arc<dyn Layer2Wallet>,
        state: Arc<ParticipantState>,
        stats: Arc<SpammerStats>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue_name: queue_name.into(),
            queue,
            wallet,
            state,
            stats,
            config,
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Send one job to the network.
    ///
    /// On a non-success response the job's input salts are unlocked before
    /// the rejection is returned.
    pub async fn submit(&self, job: &ShieldedJob) -> Result<(), WorkerError> {
        let started = Instant::now();
        let response = self.wallet.send_layer2_tx(&job.zk_tx).await?;

        if response.is_success() {
            self.stats.record_submitted(started.elapsed());
            return Ok(());
        }

        let released = self.state.unlock(&job.tx.input_salts());
        debug!(
            participant = self.state.id(),
            released, "Released inputs of rejected job"
        );
        Err(WorkerError::Rejected {
            status: response.status,
            text: response.text,
        })
    }

    /// Submit one popped job and settle it with the broker.
    pub async fn handle(&self, job: QueuedJob) {
        let salt = job
            .data
            .lead_salt()
            .map(ToString::to_string)
            .unwrap_or_default();

        let settled = match self.submit(&job.data).await {
            Ok(()) => {
                info!(queue = %self.queue_name, salt = %salt, "zktx successfully sent");
                self.queue.complete(&self.queue_name, &job).await
            }
            Err(e @ WorkerError::Rejected { .. }) => {
                error!(queue = %self.queue_name, salt = %salt, error = %e, "Job failed");
                self.stats.record_rejected();
                self.queue.fail(&self.queue_name, &job, &e.to_string()).await
            }
            Err(WorkerError::Network(e)) if job.attempts + 1 < self.config.max_attempts => {
                warn!(
                    queue = %self.queue_name,
                    salt = %salt,
                    attempt = job.attempts + 1,
                    error = %e,
                    "Network unreachable, retrying job later"
                );
                self.stats.record_retried();
                let retried = self
                    .queue
                    .retry(&self.queue_name, &job, self.config.retry_delay)
                    .await;
                if retried.is_err() {
                    // The job will not be redelivered, so its inputs must be free again.
                    self.state.unlock(&job.data.tx.input_salts());
                }
                retried
            }
            Err(WorkerError::Network(e)) => {
                error!(queue = %self.queue_name, salt = %salt, error = %e, "Giving up on job");
                self.state.unlock(&job.data.tx.input_salts());
                self.stats.record_rejected();
                self.queue.fail(&self.queue_name, &job, &e.to_string()).await
            }
        };

        if let Err(e) = settled {
            warn!(queue = %self.queue_name, job_id = job.id, error = %e, "Failed to settle job");
        }
    }

    /// Process jobs until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        info!(queue = %self.queue_name, "Worker started");

        match self.queue.recover_stalled(&self.queue_name).await {
            Ok(0) => {}
            Ok(recovered) => info!(queue = %self.queue_name, recovered, "Recovered stalled jobs"),
            Err(e) => warn!(queue = %self.queue_name, error = %e, "Failed to recover stalled jobs"),
        }

        loop {
            let popped = tokio::select! {
                _ = cancel.cancelled() => break,
                popped = self.queue.pop(&self.queue_name, self.config.pop_wait) => popped,
            };

            match popped {
                Ok(Some(job)) => self.handle(job).await,
                Ok(None) => {}
                Err(e) => {
                    warn!(queue = %self.queue_name, error = %e, "Failed to pop job");
                    tokio::time::sleep(self.config.error_backoff).await;
                }
            }
        }

        info!(queue = %self.queue_name, "Worker stopped");
    }
}

/// Why a job did not go through.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Network rejected transaction with status {status}: {text}")]
    Rejected { status: u16, text: String },

    #[error("Network unreachable: {0}")]
    Network(#[from] ChainError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{MemoryBroker, QueueError};
    use crate::wallet::DepositNote;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Duration;
    use stressnet_types::{
        wei, GeneratedTx, Salt, SpendUnit, SubmitResponse, UtxoStatus, Wei, ZkAddress, ZkPayload,
    };

    /// Wallet whose submissions answer from a script.
    struct ScriptedWallet {
        address: ZkAddress,
        responses: Mutex<VecDeque<Result<SubmitResponse, ChainError>>>,
    }

    impl ScriptedWallet {
        fn new(responses: Vec<Result<SubmitResponse, ChainError>>) -> Self {
            Self {
                address: ZkAddress::new("zk1jo"),
                responses: Mutex::new(responses.into()),
            }
        }
    }

    #[async_trait]
    impl Layer2Wallet for ScriptedWallet {
        fn zk_address(&self) -> &ZkAddress {
            &self.address
        }

        fn eth_address(&self) -> &str {
            "0xjo"
        }

        async fn deposit_ether(
            &self,
            _value: &Wei,
            _fee: &Wei,
            _note: Option<DepositNote>,
        ) -> Result<(), ChainError> {
            Ok(())
        }

        async fn staged_deposits_merged(&self) -> Result<u64, ChainError> {
            Ok(0)
        }

        async fn get_utxos(&self, _status: UtxoStatus) -> Result<Vec<SpendUnit>, ChainError> {
            Ok(vec![])
        }

        async fn shield_tx(&self, _tx: &GeneratedTx) -> Result<ZkPayload, ChainError> {
            Ok(ZkPayload(vec![]))
        }

        async fn send_layer2_tx(&self, _payload: &ZkPayload) -> Result<SubmitResponse, ChainError> {
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(SubmitResponse::accepted()))
        }
    }

    fn job(salt: u64) -> ShieldedJob {
        let input = SpendUnit::new(ZkAddress::new("zk1jo"), Salt::from(salt), wei(100));
        let output = SpendUnit::new(ZkAddress::new("zk1jo"), Salt::from(salt).left(), wei(50));
        ShieldedJob::new(
            GeneratedTx::new(vec![input], vec![output], wei(1)),
            ZkPayload(vec![0xaa]),
        )
    }

    fn worker(
        responses: Vec<Result<SubmitResponse, ChainError>>,
        broker: Arc<MemoryBroker>,
    ) -> (SubmissionWorker, Arc<ParticipantState>, Arc<SpammerStats>) {
        let state = Arc::new(ParticipantState::new(1));
        let stats = Arc::new(SpammerStats::new());
        let worker = SubmissionWorker::new(
            "wallet_1",
            broker,
            Arc::new(ScriptedWallet::new(responses)),
            state.clone(),
            stats.clone(),
            WorkerConfig {
                retry_delay: Duration::from_secs(2),
                max_attempts: 2,
                ..WorkerConfig::default()
            },
        );
        (worker, state, stats)
    }

    #[tokio::test]
    async fn test_rejection_unlocks_inputs_and_continues() {
        let broker = Arc::new(MemoryBroker::new());
        let (worker, state, stats) = worker(
            vec![Ok(SubmitResponse::rejected(400, "double spend"))],
            broker.clone(),
        );
        state.mark_used(Salt::from(3));
        state.mark_used(Salt::from(5));

        broker.add("wallet_1", job(3)).await.unwrap();
        broker.add("wallet_1", job(5)).await.unwrap();

        let first = broker.pop("wallet_1", Duration::ZERO).await.unwrap().unwrap();
        worker.handle(first).await;
        assert!(!state.is_used(&Salt::from(3)));
        assert_eq!(broker.failed("wallet_1").len(), 1);
        assert!(broker.failed("wallet_1")[0].1.contains("double spend"));

        let second = broker.pop("wallet_1", Duration::ZERO).await.unwrap().unwrap();
        worker.handle(second).await;
        assert!(state.is_used(&Salt::from(5)));
        assert_eq!(broker.completed("wallet_1"), 1);

        let report = stats.report();
        assert_eq!(report.rejected, 1);
        assert_eq!(report.submitted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_error_retries_then_gives_up() {
        let broker = Arc::new(MemoryBroker::new());
        let (worker, state, stats) = worker(
            vec![
                Err(ChainError::Refused("connection reset".into())),
                Err(ChainError::Refused("connection reset".into())),
            ],
            broker.clone(),
        );
        state.mark_used(Salt::from(9));
        broker.add("wallet_1", job(9)).await.unwrap();

        let popped = broker.pop("wallet_1", Duration::ZERO).await.unwrap().unwrap();
        worker.handle(popped).await;
        assert_eq!(broker.delayed("wallet_1"), 1);
        assert!(state.is_used(&Salt::from(9)), "retry keeps the reservation");

        assert!(broker.failed("wallet_1").is_empty());
        tokio::time::advance(Duration::from_secs(3)).await;
        broker.promote_delayed("wallet_1").await.unwrap();
        let popped = broker.pop("wallet_1", Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(popped.attempts, 1);
        worker.handle(popped).await;

        assert_eq!(broker.failed("wallet_1").len(), 1);
        assert!(!state.is_used(&Salt::from(9)));
        assert_eq!(stats.report().retried, 1);
    }

    /// Broker whose retries never land.
    struct RetryFails(Arc<MemoryBroker>);

    #[async_trait]
    impl JobQueue for RetryFails {
        async fn add(&self, job_name: &str, job: ShieldedJob) -> Result<u64, QueueError> {
            self.0.add(job_name, job).await
        }

        async fn pop(&self, queue: &str, wait: Duration) -> Result<Option<QueuedJob>, QueueError> {
            self.0.pop(queue, wait).await
        }

        async fn complete(&self, queue: &str, job: &QueuedJob) -> Result<(), QueueError> {
            self.0.complete(queue, job).await
        }

        async fn fail(&self, queue: &str, job: &QueuedJob, reason: &str) -> Result<(), QueueError> {
            self.0.fail(queue, job, reason).await
        }

        async fn retry(
            &self,
            _queue: &str,
            _job: &QueuedJob,
            _delay: Duration,
        ) -> Result<(), QueueError> {
            Err(QueueError::Codec(
                serde_json::from_str::<u8>("not json").unwrap_err(),
            ))
        }

        async fn promote_delayed(&self, queue: &str) -> Result<usize, QueueError> {
            self.0.promote_delayed(queue).await
        }

        async fn recover_stalled(&self, queue: &str) -> Result<usize, QueueError> {
            self.0.recover_stalled(queue).await
        }

        async fn depth(&self, queue: &str) -> Result<usize, QueueError> {
            self.0.depth(queue).await
        }
    }

    #[tokio::test]
    async fn test_failed_retry_releases_inputs() {
        let broker = Arc::new(MemoryBroker::new());
        let state = Arc::new(ParticipantState::new(1));
        let worker = SubmissionWorker::new(
            "wallet_1",
            Arc::new(RetryFails(broker.clone())),
            Arc::new(ScriptedWallet::new(vec![Err(ChainError::Refused(
                "connection reset".into(),
            ))])),
            state.clone(),
            Arc::new(SpammerStats::new()),
            WorkerConfig::default(),
        );
        state.mark_used(Salt::from(7));
        broker.add("wallet_1", job(7)).await.unwrap();

        let popped = broker.pop("wallet_1", Duration::ZERO).await.unwrap().unwrap();
        worker.handle(popped).await;

        assert!(!state.is_used(&Salt::from(7)));
        assert_eq!(broker.delayed("wallet_1"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_drains_queue_until_cancelled() {
        let broker = Arc::new(MemoryBroker::new());
        let (worker, _state, stats) = worker(vec![], broker.clone());
        for salt in 1..=3 {
            broker.add("wallet_1", job(salt)).await.unwrap();
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(worker.run(cancel.clone()));
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(broker.completed("wallet_1"), 3);
        assert_eq!(broker.outstanding(), 0);
        assert_eq!(stats.report().submitted, 3);

        cancel.cancel();
        handle.await.unwrap();
    }
}
