//! In-process broker.

use super::{JobQueue, QueueError, QueuedJob};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use stressnet_types::ShieldedJob;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

#[derive(Debug, Default)]
struct QueueState {
    waiting: VecDeque<QueuedJob>,
    active: Vec<QueuedJob>,
    delayed: Vec<(Instant, QueuedJob)>,
    failed: Vec<(QueuedJob, String)>,
    completed: u64,
}

impl QueueState {
    fn take_active(&mut self, id: u64) -> Option<QueuedJob> {
        let pos = self.active.iter().position(|j| j.id == id)?;
        Some(self.active.swap_remove(pos))
    }

    fn outstanding(&self) -> usize {
        self.waiting.len() + self.active.len() + self.delayed.len()
    }
}

/// Broker holding every queue in memory.
///
/// Jobs added to the main queue are dispatched straight to the private
/// queue named by their job name, standing in for the coordinator's relay.
#[derive(Debug, Default)]
pub struct MemoryBroker {
    queues: Mutex<HashMap<String, QueueState>>,
    next_id: AtomicU64,
    notify: Notify,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs not yet completed or failed, across every queue.
    pub fn outstanding(&self) -> usize {
        self.queues.lock().values().map(QueueState::outstanding).sum()
    }

    pub fn completed(&self, queue: &str) -> u64 {
        self.queues.lock().get(queue).map_or(0, |q| q.completed)
    }

    pub fn failed(&self, queue: &str) -> Vec<(QueuedJob, String)> {
        self.queues
            .lock()
            .get(queue)
            .map(|q| q.failed.clone())
            .unwrap_or_default()
    }

    pub fn delayed(&self, queue: &str) -> usize {
        self.queues.lock().get(queue).map_or(0, |q| q.delayed.len())
    }

    fn try_pop(&self, queue: &str) -> Option<QueuedJob> {
        let mut queues = self.queues.lock();
        let state = queues.get_mut(queue)?;
        let job = state.waiting.pop_front()?;
        state.active.push(job.clone());
        Some(job)
    }
}

#[async_trait]
impl JobQueue for MemoryBroker {
    async fn add(&self, job_name: &str, job: ShieldedJob) -> Result<u64, QueueError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.queues
            .lock()
            .entry(job_name.to_string())
            .or_default()
            .waiting
            .push_back(QueuedJob::new(id, job_name, job));
        trace!(job_id = id, queue = job_name, "Job dispatched");
        self.notify.notify_waiters();
        Ok(id)
    }

    async fn pop(&self, queue: &str, wait: Duration) -> Result<Option<QueuedJob>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(job) = self.try_pop(queue) {
                return Ok(Some(job));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn complete(&self, queue: &str, job: &QueuedJob) -> Result<(), QueueError> {
        let mut queues = self.queues.lock();
        if let Some(state) = queues.get_mut(queue) {
            if state.take_active(job.id).is_some() {
                state.completed += 1;
            }
        }
        Ok(())
    }

    async fn fail(&self, queue: &str, job: &QueuedJob, reason: &str) -> Result<(), QueueError> {
        let mut queues = self.queues.lock();
        let state = queues.entry(queue.to_string()).or_default();
        let failed = state.take_active(job.id).unwrap_or_else(|| job.clone());
        state.failed.push((failed, reason.to_string()));
        Ok(())
    }

    async fn retry(
        &self,
        queue: &str,
        job: &QueuedJob,
        delay: Duration,
    ) -> Result<(), QueueError> {
        let mut queues = self.queues.lock();
        let state = queues.entry(queue.to_string()).or_default();
        let mut retried = state.take_active(job.id).unwrap_or_else(|| job.clone());
        retried.attempts += 1;
        state.delayed.push((Instant::now() + delay, retried));
        Ok(())
    }

    async fn promote_delayed(&self, queue: &str) -> Result<usize, QueueError> {
        let now = Instant::now();
        let promoted = {
            let mut queues = self.queues.lock();
            let Some(state) = queues.get_mut(queue) else {
                return Ok(0);
            };
            let (due, later): (Vec<_>, Vec<_>) =
                state.delayed.drain(..).partition(|(at, _)| *at <= now);
            state.delayed = later;
            let count = due.len();
            state.waiting.extend(due.into_iter().map(|(_, job)| job));
            count
        };
        if promoted > 0 {
            self.notify.notify_waiters();
        }
        Ok(promoted)
    }

    async fn recover_stalled(&self, queue: &str) -> Result<usize, QueueError> {
        let mut queues = self.queues.lock();
        let Some(state) = queues.get_mut(queue) else {
            return Ok(0);
        };
        let stalled: Vec<_> = state.active.drain(..).collect();
        let count = stalled.len();
        for job in stalled.into_iter().rev() {
            state.waiting.push_front(job);
        }
        Ok(count)
    }

    async fn depth(&self, queue: &str) -> Result<usize, QueueError> {
        Ok(self.queues.lock().get(queue).map_or(0, |q| q.waiting.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use stressnet_types::{wei, GeneratedTx, Salt, SpendUnit, ZkAddress, ZkPayload};

    fn job(salt: u64) -> ShieldedJob {
        let input = SpendUnit::new(ZkAddress::new("zk1frank"), Salt::from(salt), wei(100));
        ShieldedJob::new(GeneratedTx::new(vec![input], vec![], wei(1)), ZkPayload(vec![1]))
    }

    #[tokio::test]
    async fn test_fifo_and_acknowledgement() {
        let broker = MemoryBroker::new();
        broker.add("wallet_1", job(1)).await.unwrap();
        broker.add("wallet_1", job(2)).await.unwrap();
        assert_eq!(broker.depth("wallet_1").await.unwrap(), 2);
        assert_eq!(broker.outstanding(), 2);

        let first = broker.pop("wallet_1", Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(first.data.lead_salt(), Some(&Salt::from(1)));
        assert_eq!(broker.outstanding(), 2);

        broker.complete("wallet_1", &first).await.unwrap();
        assert_eq!(broker.completed("wallet_1"), 1);

        let second = broker.pop("wallet_1", Duration::ZERO).await.unwrap().unwrap();
        broker.fail("wallet_1", &second, "rejected").await.unwrap();
        assert_eq!(broker.failed("wallet_1").len(), 1);
        assert_eq!(broker.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_queues_are_isolated() {
        let broker = MemoryBroker::new();
        broker.add("wallet_1", job(1)).await.unwrap();
        assert!(broker
            .pop("wallet_2", Duration::ZERO)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pop_wakes_on_add() {
        let broker = Arc::new(MemoryBroker::new());
        let consumer = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.pop("wallet_1", Duration::from_secs(10)).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        broker.add("wallet_1", job(4)).await.unwrap();

        let popped = consumer.await.unwrap().unwrap();
        assert_eq!(popped.unwrap().data.lead_salt(), Some(&Salt::from(4)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_for_promotion() {
        let broker = MemoryBroker::new();
        broker.add("wallet_1", job(1)).await.unwrap();
        let popped = broker.pop("wallet_1", Duration::ZERO).await.unwrap().unwrap();

        broker
            .retry("wallet_1", &popped, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(broker.promote_delayed("wallet_1").await.unwrap(), 0);
        assert_eq!(broker.delayed("wallet_1"), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(broker.promote_delayed("wallet_1").await.unwrap(), 1);

        let again = broker.pop("wallet_1", Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(again.id, popped.id);
        assert_eq!(again.attempts, 1);
    }

    #[tokio::test]
    async fn test_recover_stalled_requeues_active() {
        let broker = MemoryBroker::new();
        broker.add("wallet_1", job(1)).await.unwrap();
        broker.add("wallet_1", job(2)).await.unwrap();
        let _ = broker.pop("wallet_1", Duration::ZERO).await.unwrap();

        assert_eq!(broker.recover_stalled("wallet_1").await.unwrap(), 1);
        let next = broker.pop("wallet_1", Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(next.data.lead_salt(), Some(&Salt::from(1)));
    }
}
