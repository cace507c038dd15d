//! Stressnet load generator
//!
//! Drives sustained transaction load against a layer-2 chain and keeps the
//! chain live while doing so.
//!
//! # Architecture
//!
//! ```text
//! Generator ──► TransferBuilder ──► shield ──► JobQueue ──► SubmissionWorker ──► chain
//!     │                                                          │
//!     └──────────── ParticipantState (used salts) ◄──────────────┘
//!
//! BlockTurner: proposal events ──► deadline reset ──► fallback deposit on expiry
//! ```
//!
//! - **Generator**: one per participant. Deposits, waits for activation,
//!   then turns its own notes over one at a time under coordinator
//!   backpressure.
//! - **SpendChainAllocator**: tracks consumed salts so an input is never
//!   handed out twice while its spend is in flight.
//! - **SubmissionWorker**: drains the participant's private queue and
//!   releases salts whose spend was rejected.
//! - **BlockTurner**: one per deployment. Sends a minimal deposit when no
//!   block has been proposed for a deadline window.
//!
//! Chain access goes through [`wallet::Layer2Wallet`] and
//! [`wallet::ProposalSource`]; coordinator access through
//! [`client::CoordinatorClient`]. [`sim`] implements all of them in
//! process.
//!
//! # Example
//!
//! ```ignore
//! use stressnet_spammer::{Generator, GeneratorConfig};
//!
//! let config = GeneratorConfig::new(1).with_main_queue_limit(500);
//! let mut generator = Generator::new(config, wallet, coordinator, queue, stats)?;
//! let handle = generator.handle();
//! generator.run().await?;
//! ```

pub mod allocator;
pub mod builder;
pub mod client;
pub mod config;
pub mod generator;
pub mod queue;
pub mod sim;
pub mod state;
pub mod stats;
pub mod turner;
pub mod wallet;
pub mod worker;

pub use allocator::SpendChainAllocator;
pub use builder::{AmountPolicy, BuildError, TransferBuilder};
pub use client::{ClientError, CoordinatorClient, HttpCoordinator, LocalCoordinator};
pub use config::{ConfigError, GeneratorConfig, QueueConfig, TurnerConfig, WorkerConfig};
pub use generator::{Generator, GeneratorError, GeneratorHandle, GeneratorPhase, StepOutcome};
pub use queue::{JobQueue, MemoryBroker, QueueError, QueueScheduler, RedisBroker};
pub use sim::{SimConfig, SimWallet, SimulatedChain};
pub use state::ParticipantState;
pub use stats::{SpammerStats, StatsReport};
pub use turner::{BlockTurner, TurnerError, WatchdogState};
pub use wallet::{ChainError, HttpWallet, Layer2Wallet, ProposalSource};
pub use worker::{SubmissionWorker, WorkerError};
