//! Redis-backed broker.
//!
//! Layout per queue `q`:
//!
//! - `q:wait` list, pushed on the left and popped on the right
//! - `q:active` list of popped, unacknowledged jobs
//! - `q:delayed` sorted set scored by due time in unix milliseconds
//! - `q:failed` list of [`FailedJob`] records
//!
//! Jobs are stored as JSON. Every move between keys is a single atomic
//! step (`BLMOVE`, `LMOVE`, `MULTI`/`EXEC`, or a script), so a job is never
//! absent from all of them and a crashed consumer leaves it recoverable.

use super::{FailedJob, JobQueue, QueueError, QueuedJob, MAIN_QUEUE};
use crate::config::QueueConfig;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Direction};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use stressnet_types::ShieldedJob;
use tracing::{debug, info};

fn key(queue: &str, part: &str) -> String {
    format!("{}:{}", queue, part)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Broker storing queues in Redis.
#[derive(Clone)]
pub struct RedisBroker {
    conn: MultiplexedConnection,
    /// Dedicated to blocking pops so they never stall other commands.
    blocking: MultiplexedConnection,
}

impl RedisBroker {
    pub async fn connect(config: &QueueConfig) -> Result<Self, QueueError> {
        Self::connect_url(&config.url()).await
    }

    pub async fn connect_url(url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        let blocking = client.get_multiplexed_async_connection().await?;
        info!(url, "Connected to queue broker");
        Ok(Self { conn, blocking })
    }

    fn decode(raw: String) -> Result<QueuedJob, QueueError> {
        let mut job: QueuedJob = serde_json::from_str(&raw)?;
        job.raw = Some(raw);
        Ok(job)
    }

    /// Stored encoding of a popped job, as it sits in `active`.
    fn active_entry(job: &QueuedJob) -> Result<String, QueueError> {
        match &job.raw {
            Some(raw) => Ok(raw.clone()),
            None => Ok(serde_json::to_string(job)?),
        }
    }

    /// Remove a popped job from `active`.
    async fn take_active(&self, queue: &str, job: &QueuedJob) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn
            .lrem(key(queue, "active"), 1, Self::active_entry(job)?)
            .await?;
        if removed == 0 {
            debug!(queue, job_id = job.id, "Job was not active");
        }
        Ok(())
    }
}

/// Moves one member of a sorted set to the head of a list, only if this
/// caller removed it.
const PROMOTE_SCRIPT: &str = r#"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 1 then
    redis.call('LPUSH', KEYS[2], ARGV[1])
    return 1
end
return 0
"#;

#[async_trait]
impl JobQueue for RedisBroker {
    async fn add(&self, job_name: &str, job: ShieldedJob) -> Result<u64, QueueError> {
        let mut conn = self.conn.clone();
        let id: u64 = conn.incr(key(MAIN_QUEUE, "id"), 1).await?;
        let encoded = serde_json::to_string(&QueuedJob::new(id, job_name, job))?;
        let _: i64 = conn.lpush(key(MAIN_QUEUE, "wait"), encoded).await?;
        Ok(id)
    }

    async fn pop(&self, queue: &str, wait: Duration) -> Result<Option<QueuedJob>, QueueError> {
        let mut conn = self.blocking.clone();
        let raw: Option<String> = conn
            .blmove(
                key(queue, "wait"),
                key(queue, "active"),
                Direction::Right,
                Direction::Left,
                wait.as_secs_f64(),
            )
            .await?;
        raw.map(Self::decode).transpose()
    }

    async fn complete(&self, queue: &str, job: &QueuedJob) -> Result<(), QueueError> {
        self.take_active(queue, job).await
    }

    async fn fail(&self, queue: &str, job: &QueuedJob, reason: &str) -> Result<(), QueueError> {
        let record = FailedJob {
            job: job.clone(),
            reason: reason.to_string(),
        };
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .lrem(key(queue, "active"), 1, Self::active_entry(job)?)
            .ignore()
            .lpush(key(queue, "failed"), serde_json::to_string(&record)?)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn retry(
        &self,
        queue: &str,
        job: &QueuedJob,
        delay: Duration,
    ) -> Result<(), QueueError> {
        let mut retried = job.clone();
        retried.attempts += 1;
        retried.raw = None;
        let due = now_millis() + delay.as_millis() as u64;

        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .lrem(key(queue, "active"), 1, Self::active_entry(job)?)
            .ignore()
            .zadd(key(queue, "delayed"), serde_json::to_string(&retried)?, due)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn promote_delayed(&self, queue: &str) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let delayed = key(queue, "delayed");
        let due: Vec<String> = conn.zrangebyscore(&delayed, "-inf", now_millis()).await?;

        let script = redis::Script::new(PROMOTE_SCRIPT);
        let mut promoted = 0;
        for raw in due {
            let moved: i64 = script
                .key(&delayed)
                .key(key(queue, "wait"))
                .arg(&raw)
                .invoke_async(&mut conn)
                .await?;
            promoted += moved as usize;
        }
        Ok(promoted)
    }

    async fn recover_stalled(&self, queue: &str) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let mut recovered = 0;
        loop {
            let moved: Option<String> = conn
                .lmove(
                    key(queue, "active"),
                    key(queue, "wait"),
                    Direction::Left,
                    Direction::Right,
                )
                .await?;
            if moved.is_none() {
                return Ok(recovered);
            }
            recovered += 1;
        }
    }

    async fn depth(&self, queue: &str) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        Ok(conn.llen(key(queue, "wait")).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stressnet_types::{wei, GeneratedTx, Salt, SpendUnit, ZkAddress, ZkPayload};

    fn sample_job(salt: u64) -> ShieldedJob {
        let input = SpendUnit::new(ZkAddress::new("zk1gina"), Salt::from(salt), wei(10));
        ShieldedJob::new(GeneratedTx::new(vec![input], vec![], wei(1)), ZkPayload(vec![]))
    }

    /// Broker against the server in `REDIS_URL`, and a queue name no other
    /// test uses.
    async fn live_broker(tag: &str) -> (RedisBroker, String) {
        let url = std::env::var("REDIS_URL").expect("REDIS_URL must be set");
        let broker = RedisBroker::connect_url(&url).await.unwrap();
        let queue = format!("stressnet-test-{}-{}", tag, rand::random::<u64>());
        (broker, queue)
    }

    async fn push(broker: &RedisBroker, queue: &str, id: u64) {
        let encoded = serde_json::to_string(&QueuedJob::new(id, queue, sample_job(id))).unwrap();
        let mut conn = broker.conn.clone();
        let _: i64 = conn.lpush(key(queue, "wait"), encoded).await.unwrap();
    }

    async fn len(broker: &RedisBroker, queue: &str, part: &str) -> usize {
        let mut conn = broker.conn.clone();
        if part == "delayed" {
            conn.zcard(key(queue, part)).await.unwrap()
        } else {
            conn.llen(key(queue, part)).await.unwrap()
        }
    }

    async fn cleanup(broker: &RedisBroker, queue: &str) {
        let mut conn = broker.conn.clone();
        let keys: Vec<String> = ["wait", "active", "delayed", "failed"]
            .iter()
            .map(|part| key(queue, part))
            .collect();
        let _: i64 = conn.del(keys).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a redis server in REDIS_URL"]
    async fn test_live_pop_moves_wait_to_active() {
        let (broker, queue) = live_broker("pop").await;
        push(&broker, &queue, 1).await;

        let job = broker.pop(&queue, Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(job.id, 1);
        assert_eq!(broker.depth(&queue).await.unwrap(), 0);
        assert_eq!(len(&broker, &queue, "active").await, 1);

        assert!(broker.pop(&queue, Duration::from_millis(100)).await.unwrap().is_none());
        cleanup(&broker, &queue).await;
    }

    #[tokio::test]
    #[ignore = "requires a redis server in REDIS_URL"]
    async fn test_live_complete_and_fail_settle_job() {
        let (broker, queue) = live_broker("settle").await;
        push(&broker, &queue, 1).await;
        push(&broker, &queue, 2).await;

        let first = broker.pop(&queue, Duration::from_secs(1)).await.unwrap().unwrap();
        broker.complete(&queue, &first).await.unwrap();
        assert_eq!(len(&broker, &queue, "active").await, 0);

        let second = broker.pop(&queue, Duration::from_secs(1)).await.unwrap().unwrap();
        broker.fail(&queue, &second, "double spend").await.unwrap();
        assert_eq!(len(&broker, &queue, "active").await, 0);
        assert_eq!(len(&broker, &queue, "failed").await, 1);
        assert_eq!(broker.depth(&queue).await.unwrap(), 0);
        cleanup(&broker, &queue).await;
    }

    #[tokio::test]
    #[ignore = "requires a redis server in REDIS_URL"]
    async fn test_live_retry_then_promote_redelivers() {
        let (broker, queue) = live_broker("retry").await;
        push(&broker, &queue, 1).await;

        let job = broker.pop(&queue, Duration::from_secs(1)).await.unwrap().unwrap();
        broker.retry(&queue, &job, Duration::ZERO).await.unwrap();
        assert_eq!(len(&broker, &queue, "active").await, 0);
        assert_eq!(len(&broker, &queue, "delayed").await, 1);

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(broker.promote_delayed(&queue).await.unwrap(), 1);
        assert_eq!(broker.promote_delayed(&queue).await.unwrap(), 0);

        let again = broker.pop(&queue, Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(again.id, 1);
        assert_eq!(again.attempts, 1);
        cleanup(&broker, &queue).await;
    }

    #[tokio::test]
    #[ignore = "requires a redis server in REDIS_URL"]
    async fn test_live_recover_stalled_oldest_first() {
        let (broker, queue) = live_broker("stalled").await;
        for id in 1..=3 {
            push(&broker, &queue, id).await;
        }
        for _ in 0..3 {
            broker.pop(&queue, Duration::from_secs(1)).await.unwrap().unwrap();
        }

        assert_eq!(broker.recover_stalled(&queue).await.unwrap(), 3);
        assert_eq!(len(&broker, &queue, "active").await, 0);

        let mut order = Vec::new();
        while let Some(job) = broker.pop(&queue, Duration::from_millis(100)).await.unwrap() {
            order.push(job.id);
        }
        assert_eq!(order, vec![1, 2, 3]);
        cleanup(&broker, &queue).await;
    }

    #[test]
    fn test_key_layout() {
        assert_eq!(key("wallet_3", "wait"), "wallet_3:wait");
        assert_eq!(key(MAIN_QUEUE, "id"), "mainQueue:id");
    }

    #[test]
    fn test_decode_keeps_raw_encoding() {
        let job = QueuedJob::new(5, "wallet_1", sample_job(1));
        let raw = serde_json::to_string(&job).unwrap();
        let decoded = RedisBroker::decode(raw.clone()).unwrap();
        assert_eq!(decoded.id, 5);
        assert_eq!(decoded.attempts, 0);
        assert_eq!(decoded.raw.as_deref(), Some(raw.as_str()));
    }
}
