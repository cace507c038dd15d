//! Companion task that keeps delayed jobs moving.

use super::JobQueue;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Periodically promotes due delayed jobs of one queue.
///
/// Without it a retried job would only move when something else touched the
/// queue; with it, retries progress even when no new jobs arrive.
pub struct QueueScheduler {
    queue: Arc<dyn JobQueue>,
    name: String,
    interval: Duration,
}

impl QueueScheduler {
    pub fn new(queue: Arc<dyn JobQueue>, name: impl Into<String>, interval: Duration) -> Self {
        Self {
            queue,
            name: name.into(),
            interval,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// One promotion pass.
    pub async fn tick(&self) -> usize {
        match self.queue.promote_delayed(&self.name).await {
            Ok(0) => 0,
            Ok(promoted) => {
                debug!(queue = %self.name, promoted, "Promoted delayed jobs");
                promoted
            }
            Err(e) => {
                warn!(queue = %self.name, error = %e, "Failed to promote delayed jobs");
                0
            }
        }
    }

    /// Run until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        info!(queue = %self.name, "Queue scheduler on");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
        debug!(queue = %self.name, "Queue scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryBroker;
    use stressnet_types::{wei, GeneratedTx, Salt, ShieldedJob, SpendUnit, ZkAddress, ZkPayload};

    #[tokio::test(start_paused = true)]
    async fn test_delayed_job_progresses_without_new_jobs() {
        let broker = Arc::new(MemoryBroker::new());
        let input = SpendUnit::new(ZkAddress::new("zk1hal"), Salt::from(1), wei(10));
        let job = ShieldedJob::new(GeneratedTx::new(vec![input], vec![], wei(1)), ZkPayload(vec![]));
        broker.add("wallet_1", job).await.unwrap();
        let popped = broker.pop("wallet_1", Duration::ZERO).await.unwrap().unwrap();
        broker
            .retry("wallet_1", &popped, Duration::from_secs(3))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let scheduler = QueueScheduler::new(broker.clone(), "wallet_1", Duration::from_secs(1));
        let handle = tokio::spawn(scheduler.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(4_500)).await;
        assert_eq!(broker.delayed("wallet_1"), 0);
        assert_eq!(broker.depth("wallet_1").await.unwrap(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }
}
