//! Stressnet CLI
//!
//! Runs one participant generator, the block-turner watchdog, or a complete
//! in-process simulation.

use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use stressnet_spammer::config::DEFAULT_ORGANIZER_URL;
use stressnet_spammer::{
    BlockTurner, Generator, GeneratorConfig, HttpCoordinator, HttpWallet, LocalCoordinator,
    MemoryBroker, QueueConfig, RedisBroker, SimConfig, SimulatedChain, SpammerStats, TurnerConfig,
    WorkerConfig,
};
use stressnet_types::gwei;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stressnet")]
#[command(about = "Layer-2 load generator and block-turner watchdog")]
#[command(version)]
struct Cli {
    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one participant: deposit, activate, then generate self-transfers
    Generator {
        /// Participant id; also names the private queue `wallet_<id>`
        #[arg(long, env = "WALLET_ID")]
        id: u32,

        /// Wallet gateway URL
        #[arg(long, env = "WALLET_URL")]
        wallet_url: String,

        /// Coordinator URL
        #[arg(long, env = "ORGANIZER_URL", default_value = DEFAULT_ORGANIZER_URL)]
        organizer_url: String,

        /// Queue broker host
        #[arg(long, env = "REDIS_HOST", default_value = "localhost")]
        redis_host: String,

        /// Queue broker port
        #[arg(long, env = "REDIS_PORT", default_value = "6379")]
        redis_port: u16,

        #[command(flatten)]
        tuning: GeneratorArgs,
    },

    /// Run the block-turner watchdog
    Turner {
        /// Wallet gateway URL for the turner's own account
        #[arg(long, env = "WALLET_URL")]
        wallet_url: String,

        /// Coordinator URL
        #[arg(long, env = "ORGANIZER_URL", default_value = DEFAULT_ORGANIZER_URL)]
        organizer_url: String,

        /// Interval between participant readiness checks
        #[arg(long, default_value = "14s")]
        readiness_poll: humantime::Duration,

        /// Wait after all participants registered, before arming
        #[arg(long, default_value = "35s")]
        grace: humantime::Duration,

        /// Expected layer-1 block period
        #[arg(long, default_value = "14s")]
        block_period: humantime::Duration,

        /// Block periods without a proposal before a fallback deposit
        #[arg(long, default_value = "15")]
        deadline_blocks: u32,

        /// Layer-1 block to watch proposals from
        #[arg(long, default_value = "0")]
        start_block: u64,
    },

    /// Run participants and the watchdog against an in-process chain
    Simulate {
        /// Number of participants
        #[arg(long, default_value = "4")]
        wallets: u32,

        /// Duration to run (e.g., "30s", "5m")
        #[arg(short, long, default_value = "60s")]
        duration: humantime::Duration,

        /// Simulated block interval
        #[arg(long, default_value = "1s")]
        block_interval: humantime::Duration,

        /// Fraction of submissions the chain rejects at random (0.0 to 1.0)
        #[arg(long, default_value = "0.0")]
        reject_ratio: f64,

        /// Simulated proving time per transaction
        #[arg(long, default_value = "50ms")]
        prove_delay: humantime::Duration,

        /// RNG seed for the simulated chain
        #[arg(long, default_value = "12345")]
        seed: u64,

        #[command(flatten)]
        tuning: GeneratorArgs,
    },
}

/// Generator tuning shared by `generator` and `simulate`.
#[derive(Args, Clone)]
struct GeneratorArgs {
    /// Price per byte, in gwei
    #[arg(long, default_value = "4000")]
    fee_per_byte_gwei: u64,

    /// Pause generation while this many jobs are in flight
    #[arg(long, default_value = "1000")]
    queue_limit: u64,

    /// Interval between deposit-merged checks
    #[arg(long, default_value = "5s")]
    activation_poll: humantime::Duration,

    /// Wait after a throttled or failed iteration
    #[arg(long, default_value = "1s")]
    throttle_poll: humantime::Duration,

    /// Wait when no input is available
    #[arg(long, default_value = "5s")]
    idle_backoff: humantime::Duration,

    /// Submission attempts per job before it is failed
    #[arg(long, default_value = "3")]
    max_attempts: u32,
}

impl GeneratorArgs {
    fn config(&self, id: u32) -> GeneratorConfig {
        GeneratorConfig::new(id)
            .with_fee_per_byte(gwei(self.fee_per_byte_gwei))
            .with_main_queue_limit(self.queue_limit)
            .with_activation_poll(*self.activation_poll)
            .with_throttle_poll(*self.throttle_poll)
            .with_idle_backoff(*self.idle_backoff)
            .with_worker(WorkerConfig {
                max_attempts: self.max_attempts,
                ..WorkerConfig::default()
            })
    }
}

/// Install the global subscriber. The returned guard flushes the log file
/// and must be held until exit.
fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error>> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path.file_name().ok_or("log file path has no file name")?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .try_init()?;
    Ok(guard)
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, shutting down");
            token.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_file.as_deref())?;

    match cli.command {
        Commands::Generator {
            id,
            wallet_url,
            organizer_url,
            redis_host,
            redis_port,
            tuning,
        } => {
            let wallet = Arc::new(HttpWallet::connect(wallet_url).await?);
            let coordinator = Arc::new(HttpCoordinator::new(organizer_url)?);
            let queue_config = QueueConfig {
                host: redis_host,
                port: redis_port,
            };
            info!(url = %queue_config.url(), "Connecting to queue broker");
            let queue = Arc::new(RedisBroker::connect(&queue_config).await?);
            let stats = Arc::new(SpammerStats::new());

            let mut generator =
                Generator::new(tuning.config(id), wallet, coordinator, queue, stats.clone())?;

            let shutdown = CancellationToken::new();
            cancel_on_ctrl_c(shutdown.clone());
            let handle = generator.handle();
            tokio::spawn(async move {
                shutdown.cancelled().await;
                handle.stop();
            });

            let result = generator.run().await;
            generator.shutdown().await;
            stats.report().print();
            result?;
        }

        Commands::Turner {
            wallet_url,
            organizer_url,
            readiness_poll,
            grace,
            block_period,
            deadline_blocks,
            start_block,
        } => {
            let wallet = Arc::new(HttpWallet::connect(wallet_url).await?);
            let coordinator = Arc::new(HttpCoordinator::new(organizer_url)?);
            let config = TurnerConfig::default()
                .with_readiness_poll(*readiness_poll)
                .with_grace(*grace)
                .with_block_period(*block_period)
                .with_deadline_blocks(deadline_blocks)
                .with_start_block(start_block);

            let turner = BlockTurner::new(
                config,
                wallet.clone(),
                coordinator,
                wallet,
                Arc::new(SpammerStats::new()),
            )?;

            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());
            turner.run(cancel).await?;
        }

        Commands::Simulate {
            wallets,
            duration,
            block_interval,
            reject_ratio,
            prove_delay,
            seed,
            tuning,
        } => {
            let block_interval: Duration = *block_interval;
            let chain = SimulatedChain::new(
                SimConfig::default()
                    .with_block_interval(block_interval)
                    .with_reject_ratio(reject_ratio)
                    .with_prove_delay(*prove_delay)
                    .with_seed(seed),
            );
            let broker = Arc::new(MemoryBroker::new());
            let coordinator = Arc::new(LocalCoordinator::new(broker.clone()));
            let stats = Arc::new(SpammerStats::new());
            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());

            let proposer = chain.spawn_proposer(cancel.child_token());

            let mut handles = Vec::new();
            let mut generators = Vec::new();
            for id in 1..=wallets {
                coordinator.expect(id);
                let mut generator = Generator::new(
                    tuning.config(id),
                    Arc::new(chain.wallet(&format!("wallet{}", id))),
                    coordinator.clone(),
                    broker.clone(),
                    stats.clone(),
                )?;
                handles.push(generator.handle());
                generators.push(tokio::spawn(async move {
                    let result = generator.run().await;
                    generator.shutdown().await;
                    result
                }));
            }

            // Scaled down so the watchdog gets exercised within a short run.
            let turner = BlockTurner::new(
                TurnerConfig::default()
                    .with_readiness_poll(block_interval)
                    .with_grace(block_interval)
                    .with_block_period(block_interval),
                Arc::new(chain.wallet("turner")),
                coordinator.clone(),
                chain.clone(),
                stats.clone(),
            )?;
            let turner_cancel = cancel.child_token();
            let mut turner_task = tokio::spawn(async move { turner.run(turner_cancel).await });

            println!("Simulating {} participants for {:?}...", wallets, *duration);
            let mut turner_result = None;
            tokio::select! {
                _ = tokio::time::sleep(*duration) => {}
                _ = cancel.cancelled() => {}
                result = &mut turner_task => turner_result = Some(result),
            }

            for handle in &handles {
                handle.stop();
            }
            for task in generators {
                match task.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!(error = %e, "Generator failed"),
                    Err(e) => warn!(error = %e, "Generator task panicked"),
                }
            }

            cancel.cancel();
            let turner_result = match turner_result {
                Some(result) => result,
                None => turner_task.await,
            };
            if let Err(e) = proposer.await {
                warn!(error = %e, "Proposer task panicked");
            }

            let chain_stats = chain.stats();
            stats.report().print();
            println!(
                "  chain: {} proposals, {} deposits, {} accepted, {} rejected",
                chain_stats.proposals,
                chain_stats.deposits,
                chain_stats.accepted,
                chain_stats.rejected
            );
            println!(
                "  coordinator: {}/{} participants registered",
                coordinator.registered_count(),
                wallets
            );

            turner_result??;
        }
    }

    Ok(())
}
