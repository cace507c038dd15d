//! Configuration for generators, submission workers and the block turner.

use crate::builder::AmountPolicy;
use std::time::Duration;
use stressnet_types::{ether, gwei, milliether, wei, Salt, Wei};

/// Coordinator base URL used when `--organizer-url` and `ORGANIZER_URL` are unset.
pub const DEFAULT_ORGANIZER_URL: &str = "http://organizer:8080";

/// Rough serialized size of a one-input transfer with its proof.
pub const ESTIMATED_TX_BYTES: u64 = 1_000;

/// Connection settings for the queue broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueConfig {
    pub host: String,
    pub port: u16,
}

impl QueueConfig {
    pub fn url(&self) -> String {
        format!("redis://{}:{}/", self.host, self.port)
    }
}

/// Configuration for one participant's generator.
#[derive(Clone, Debug)]
pub struct GeneratorConfig {
    /// Participant id; also names the private submission queue.
    pub id: u32,

    /// Price offered per transaction byte.
    pub fee_per_byte: Wei,

    /// Minimum fee a transaction input must be able to cover.
    pub fee_floor: Wei,

    /// How the transferred amount is derived from the input value.
    pub amount_policy: AmountPolicy,

    /// Funding deposit made before generation starts.
    pub deposit_value: Wei,
    pub deposit_fee: Wei,
    pub deposit_salt: Salt,

    /// Pipeline depth at or above which generation pauses.
    pub main_queue_limit: u64,

    /// Interval between staged-deposit checks while awaiting activation.
    pub activation_poll: Duration,

    /// Interval between pipeline-depth checks while throttled.
    pub throttle_poll: Duration,

    /// Back-off when no spendable input is available.
    pub idle_backoff: Duration,

    pub worker: WorkerConfig,
}

impl GeneratorConfig {
    pub fn new(id: u32) -> Self {
        let fee_per_byte = gwei(4_000);
        Self {
            id,
            fee_floor: &fee_per_byte * ESTIMATED_TX_BYTES,
            fee_per_byte,
            amount_policy: AmountPolicy::default(),
            deposit_value: ether(1_000),
            deposit_fee: milliether(200),
            deposit_salt: Salt::root(),
            main_queue_limit: 1_000,
            activation_poll: Duration::from_secs(5),
            throttle_poll: Duration::from_secs(1),
            idle_backoff: Duration::from_secs(5),
            worker: WorkerConfig::default(),
        }
    }

    /// Set the price per byte. The fee floor is rescaled to match.
    pub fn with_fee_per_byte(mut self, fee_per_byte: Wei) -> Self {
        self.fee_floor = &fee_per_byte * ESTIMATED_TX_BYTES;
        self.fee_per_byte = fee_per_byte;
        self
    }

    pub fn with_fee_floor(mut self, fee_floor: Wei) -> Self {
        self.fee_floor = fee_floor;
        self
    }

    pub fn with_amount_policy(mut self, policy: AmountPolicy) -> Self {
        self.amount_policy = policy;
        self
    }

    pub fn with_deposit(mut self, value: Wei, fee: Wei) -> Self {
        self.deposit_value = value;
        self.deposit_fee = fee;
        self
    }

    pub fn with_main_queue_limit(mut self, limit: u64) -> Self {
        self.main_queue_limit = limit;
        self
    }

    pub fn with_activation_poll(mut self, interval: Duration) -> Self {
        self.activation_poll = interval;
        self
    }

    pub fn with_throttle_poll(mut self, interval: Duration) -> Self {
        self.throttle_poll = interval;
        self
    }

    pub fn with_idle_backoff(mut self, interval: Duration) -> Self {
        self.idle_backoff = interval;
        self
    }

    pub fn with_worker(mut self, worker: WorkerConfig) -> Self {
        self.worker = worker;
        self
    }

    /// Name of this participant's private submission queue.
    pub fn queue_name(&self) -> String {
        crate::queue::wallet_queue(self.id)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero("activation_poll", self.activation_poll)?;
        non_zero("throttle_poll", self.throttle_poll)?;
        non_zero("idle_backoff", self.idle_backoff)?;
        if self.main_queue_limit == 0 {
            return Err(ConfigError::ZeroQueueLimit);
        }
        self.worker.validate()
    }
}

/// Configuration for a submission worker and its queue scheduler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerConfig {
    /// How long one blocking pop waits before re-checking for shutdown.
    pub pop_wait: Duration,

    /// Back-off after a broker error.
    pub error_backoff: Duration,

    /// Delay before a job that could not reach the network is retried.
    pub retry_delay: Duration,

    /// Attempts before an unreachable-network job is given up on.
    pub max_attempts: u32,

    /// How often the scheduler promotes due delayed jobs.
    pub scheduler_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pop_wait: Duration::from_secs(1),
            error_backoff: Duration::from_secs(1),
            retry_delay: Duration::from_secs(5),
            max_attempts: 3,
            scheduler_interval: Duration::from_secs(1),
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero("pop_wait", self.pop_wait)?;
        non_zero("error_backoff", self.error_backoff)?;
        non_zero("scheduler_interval", self.scheduler_interval)?;
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        Ok(())
    }
}

/// Configuration for the block-turner watchdog.
#[derive(Clone, Debug)]
pub struct TurnerConfig {
    /// Interval between participant readiness checks.
    pub readiness_poll: Duration,

    /// Wait after all participants are ready, before arming.
    pub grace: Duration,

    /// Expected time between layer-1 blocks.
    pub block_period: Duration,

    /// Blocks without a proposal before a fallback deposit is sent.
    pub deadline_blocks: u32,

    /// Fallback deposit sent when the deadline fires.
    pub fallback_value: Wei,
    pub fallback_fee: Wei,

    /// Layer-1 block the proposal subscription starts from.
    pub start_block: u64,

    /// Back-off before re-subscribing after the event stream ends.
    pub resubscribe_backoff: Duration,
}

impl Default for TurnerConfig {
    fn default() -> Self {
        Self {
            readiness_poll: Duration::from_secs(14),
            grace: Duration::from_secs(35),
            block_period: Duration::from_secs(14),
            deadline_blocks: 15,
            fallback_value: wei(1),
            fallback_fee: milliether(100),
            start_block: 0,
            resubscribe_backoff: Duration::from_secs(5),
        }
    }
}

impl TurnerConfig {
    pub fn with_readiness_poll(mut self, interval: Duration) -> Self {
        self.readiness_poll = interval;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn with_block_period(mut self, period: Duration) -> Self {
        self.block_period = period;
        self
    }

    pub fn with_deadline_blocks(mut self, blocks: u32) -> Self {
        self.deadline_blocks = blocks;
        self
    }

    pub fn with_fallback(mut self, value: Wei, fee: Wei) -> Self {
        self.fallback_value = value;
        self.fallback_fee = fee;
        self
    }

    pub fn with_start_block(mut self, block: u64) -> Self {
        self.start_block = block;
        self
    }

    /// Idle window after which the fallback deposit fires.
    pub fn deadline(&self) -> Result<Duration, ConfigError> {
        self.block_period
            .checked_mul(self.deadline_blocks)
            .ok_or(ConfigError::DeadlineOverflow {
                block_period: self.block_period,
                blocks: self.deadline_blocks,
            })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero("readiness_poll", self.readiness_poll)?;
        non_zero("resubscribe_backoff", self.resubscribe_backoff)?;
        non_zero("deadline", self.deadline()?)
    }
}

fn non_zero(field: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        Err(ConfigError::ZeroInterval(field))
    } else {
        Ok(())
    }
}

/// Invalid configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Interval `{0}` must be greater than zero")]
    ZeroInterval(&'static str),

    #[error("Main queue limit must be greater than zero")]
    ZeroQueueLimit,

    #[error("Worker max_attempts must be at least one")]
    ZeroAttempts,

    #[error("Deadline of {blocks} blocks of {block_period:?} does not fit in a duration")]
    DeadlineOverflow { block_period: Duration, blocks: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generator_defaults() {
        let config = GeneratorConfig::new(3);
        assert_eq!(config.queue_name(), "wallet_3");
        assert_eq!(config.fee_per_byte, gwei(4_000));
        assert_eq!(config.fee_floor, gwei(4_000) * ESTIMATED_TX_BYTES);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = GeneratorConfig::new(1).with_throttle_poll(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroInterval("throttle_poll"))
        ));

        let turner = TurnerConfig::default().with_deadline_blocks(0);
        assert!(matches!(
            turner.validate(),
            Err(ConfigError::ZeroInterval("deadline"))
        ));
    }

    #[test]
    fn test_turner_deadline_is_fifteen_blocks() {
        let config = TurnerConfig::default();
        assert_eq!(config.deadline().unwrap(), Duration::from_secs(14 * 15));
    }

    #[test]
    fn test_deadline_overflow_rejected() {
        let config = TurnerConfig::default()
            .with_block_period(Duration::MAX / 2)
            .with_deadline_blocks(3);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DeadlineOverflow { blocks: 3, .. })
        ));
    }

    #[test]
    fn test_queue_url() {
        let config = QueueConfig {
            host: "redis".into(),
            port: 6380,
        };
        assert_eq!(config.url(), "redis://redis:6380/");
    }
}
