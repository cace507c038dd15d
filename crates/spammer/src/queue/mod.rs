//! Submission queues.
//!
//! Generators add shielded jobs to the shared main queue, labelled with the
//! producing participant's private queue name. The coordinator dispatches
//! them to that private queue, where the participant's own worker consumes
//! them one at a time. Each named queue has a single producer and a single
//! consumer, so the broker only needs at-least-once delivery.
//!
//! A job moves `wait → active` when popped and leaves `active` when it is
//! completed, failed, or pushed back to `delayed` for a retry. The
//! [`QueueScheduler`] promotes due delayed jobs back to `wait`.

mod memory;
mod redis;
mod scheduler;

pub use self::memory::MemoryBroker;
pub use self::redis::RedisBroker;
pub use self::scheduler::QueueScheduler;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use stressnet_types::ShieldedJob;

/// Shared queue every generator produces into.
pub const MAIN_QUEUE: &str = "mainQueue";

/// Private queue consumed by participant `id`'s worker.
pub fn wallet_queue(id: u32) -> String {
    format!("wallet_{}", id)
}

/// A job as stored in the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedJob {
    pub id: u64,
    /// Name of the private queue the job is destined for.
    pub name: String,
    pub data: ShieldedJob,
    #[serde(default)]
    pub attempts: u32,
    /// Exact stored encoding, kept so the broker can remove this entry.
    #[serde(skip)]
    pub(crate) raw: Option<String>,
}

impl QueuedJob {
    pub fn new(id: u64, name: impl Into<String>, data: ShieldedJob) -> Self {
        Self {
            id,
            name: name.into(),
            data,
            attempts: 0,
            raw: None,
        }
    }
}

/// A job that was given up on, with the reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedJob {
    pub job: QueuedJob,
    pub reason: String,
}

/// Broker operations used by generators, workers and schedulers.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Add a job to the main queue, labelled for private queue `job_name`.
    async fn add(&self, job_name: &str, job: ShieldedJob) -> Result<u64, QueueError>;

    /// Take the next job from `queue`, waiting up to `wait` for one to arrive.
    async fn pop(&self, queue: &str, wait: Duration) -> Result<Option<QueuedJob>, QueueError>;

    /// Acknowledge a popped job.
    async fn complete(&self, queue: &str, job: &QueuedJob) -> Result<(), QueueError>;

    /// Move a popped job to the failed set.
    async fn fail(&self, queue: &str, job: &QueuedJob, reason: &str) -> Result<(), QueueError>;

    /// Put a popped job back after `delay`, counting one more attempt.
    async fn retry(&self, queue: &str, job: &QueuedJob, delay: Duration)
        -> Result<(), QueueError>;

    /// Move delayed jobs that are due back to `wait`. Returns how many moved.
    async fn promote_delayed(&self, queue: &str) -> Result<usize, QueueError>;

    /// Move jobs left `active` by a dead consumer back to `wait`.
    async fn recover_stalled(&self, queue: &str) -> Result<usize, QueueError>;

    /// Jobs waiting in `queue`.
    async fn depth(&self, queue: &str) -> Result<usize, QueueError>;
}

/// Broker errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Job encoding error: {0}")]
    Codec(#[from] serde_json::Error),
}
