//! Block-turner watchdog.
//!
//! Keeps the layer-2 chain live when organic traffic stalls. Once every
//! participant has registered, the turner arms a deadline of roughly
//! `deadline_blocks` layer-1 block periods. Each proposal event cancels and
//! rearms the deadline; if it expires, a minimal fallback deposit is sent
//! from the turner's own account and the deadline is rearmed.
//!
//! The deadline and the event receiver are polled by a single task, so
//! cancel-then-rearm can never leave two timers live.

use crate::client::CoordinatorClient;
use crate::config::{ConfigError, TurnerConfig};
use crate::stats::SpammerStats;
use crate::wallet::{ChainError, Layer2Wallet, ProposalSource};
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stressnet_types::ChainEvent;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Watchdog state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogState {
    /// Waiting for participants; no deadline yet.
    Standby,
    /// Deadline armed.
    Armed { deadline: Instant },
    /// Deadline expired; fallback deposit in flight.
    Firing,
}

/// Fallback-deposit watchdog.
pub struct BlockTurner {
    config: TurnerConfig,
    wallet: Arc<dyn Layer2Wallet>,
    coordinator: Arc<dyn CoordinatorClient>,
    proposals: Arc<dyn ProposalSource>,
    stats: Arc<SpammerStats>,
    state: Mutex<WatchdogState>,
    last_proposal_at: AtomicU64,
}

impl BlockTurner {
    pub fn new(
        config: TurnerConfig,
        wallet: Arc<dyn Layer2Wallet>,
        coordinator: Arc<dyn CoordinatorClient>,
        proposals: Arc<dyn ProposalSource>,
        stats: Arc<SpammerStats>,
    ) -> Result<Self, TurnerError> {
        config.validate()?;
        Ok(Self {
            last_proposal_at: AtomicU64::new(config.start_block),
            config,
            wallet,
            coordinator,
            proposals,
            stats,
            state: Mutex::new(WatchdogState::Standby),
        })
    }

    pub fn state(&self) -> WatchdogState {
        *self.state.lock()
    }

    /// Layer-1 block number of the most recent proposal seen.
    pub fn last_proposal_at(&self) -> u64 {
        self.last_proposal_at.load(Ordering::SeqCst)
    }

    /// True when at least one participant is known and every one of them
    /// has reported a funding address.
    pub async fn participants_ready(&self) -> bool {
        match self.coordinator.registered_nodes().await {
            Ok(nodes) => !nodes.is_empty() && nodes.iter().all(|n| n.has_address()),
            Err(e) => {
                error!(error = %e, "Failed to check coordinator readiness");
                false
            }
        }
    }

    /// Poll the coordinator until every participant has registered.
    ///
    /// Returns false if cancelled first.
    pub async fn wait_for_participants(&self, cancel: &CancellationToken) -> bool {
        info!("Waiting for all participants to register with the coordinator");
        loop {
            if self.participants_ready().await {
                return true;
            }
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(self.config.readiness_poll) => {}
            }
        }
    }

    /// Wait for participants, then watch proposals until cancelled.
    ///
    /// Only a failed fallback deposit ends the turner with an error.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), TurnerError> {
        if !self.wait_for_participants(&cancel).await {
            return Ok(());
        }

        info!(grace = ?self.config.grace, "All participants registered");
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(self.config.grace) => {}
        }

        info!(
            deadline = ?self.config.deadline()?,
            from_block = self.config.start_block,
            "Block turner armed"
        );

        let (events_tx, events_rx) = mpsc::channel(256);
        let forwarder_cancel = cancel.child_token();
        let forwarder = tokio::spawn(forward_proposals(
            self.proposals.clone(),
            self.config.start_block,
            self.config.resubscribe_backoff,
            events_tx,
            forwarder_cancel.clone(),
        ));

        let result = self.watch(events_rx, &cancel).await;

        forwarder_cancel.cancel();
        if let Err(e) = forwarder.await {
            warn!(error = %e, "Proposal forwarder panicked");
        }
        result
    }

    /// Race the deadline against proposal events until cancelled.
    pub async fn watch(
        &self,
        mut events: mpsc::Receiver<ChainEvent>,
        cancel: &CancellationToken,
    ) -> Result<(), TurnerError> {
        let window = self.config.deadline()?;
        let sleep = tokio::time::sleep(window);
        tokio::pin!(sleep);
        self.arm(sleep.deadline());

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Block turner shutting down");
                    return Ok(());
                }
                event = events.recv() => match event {
                    Some(event) => {
                        self.on_proposal(&event);
                        sleep.as_mut().reset(window_end(window));
                        self.arm(sleep.deadline());
                    }
                    None => return Err(TurnerError::SubscriptionClosed),
                },
                _ = &mut sleep => {
                    *self.state.lock() = WatchdogState::Firing;
                    self.fire().await?;
                    sleep.as_mut().reset(window_end(window));
                    self.arm(sleep.deadline());
                }
            }
        }
    }

    fn arm(&self, deadline: Instant) {
        *self.state.lock() = WatchdogState::Armed { deadline };
    }

    fn on_proposal(&self, event: &ChainEvent) {
        trace!(
            proposal = event.proposal_num,
            block_hash = %event.block_hash,
            block = event.block_number,
            "New proposal"
        );
        self.last_proposal_at
            .fetch_max(event.block_number, Ordering::SeqCst);
    }

    /// Send the fallback deposit.
    pub async fn fire(&self) -> Result<(), TurnerError> {
        info!(
            blocks = self.config.deadline_blocks,
            "No proposal detected within the deadline, sending fallback deposit"
        );
        self.wallet
            .deposit_ether(&self.config.fallback_value, &self.config.fallback_fee, None)
            .await
            .map_err(|e| {
                error!(error = %e, "Fallback deposit failed");
                TurnerError::Fallback(e)
            })?;
        self.stats.record_fallback_deposit();
        Ok(())
    }
}

/// End of a deadline window starting now, clamped the way `tokio::time::sleep` clamps.
fn window_end(window: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(window)
        .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365 * 30))
}

/// Forward proposals into `events`, re-subscribing from the block after the
/// last one seen whenever the stream ends or fails to open.
async fn forward_proposals(
    source: Arc<dyn ProposalSource>,
    mut from_block: u64,
    backoff: Duration,
    events: mpsc::Sender<ChainEvent>,
    cancel: CancellationToken,
) {
    loop {
        match source.subscribe(from_block).await {
            Ok(mut stream) => {
                debug!(from_block, "Subscribed to proposals");
                loop {
                    let next = tokio::select! {
                        _ = cancel.cancelled() => return,
                        next = stream.next() => next,
                    };
                    let Some(event) = next else {
                        warn!(from_block, "Proposal stream ended");
                        break;
                    };
                    from_block = from_block.max(event.block_number + 1);
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => warn!(from_block, error = %e, "Failed to subscribe to proposals"),
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(backoff) => {}
        }
    }
}

/// Errors that end the block turner.
#[derive(Debug, thiserror::Error)]
pub enum TurnerError {
    #[error("Invalid turner configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Fallback deposit failed: {0}")]
    Fallback(ChainError),

    #[error("Proposal subscription closed")]
    SubscriptionClosed,
}
