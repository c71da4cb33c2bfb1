//! ttlkv server
//!
//! Starts the store, its expiry sweeper, and the RESP listener. Ctrl+C stops
//! accepting clients, then shuts the store down cleanly.

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};
use ttlkv::commands::CommandHandler;
use ttlkv::config::{PoolWait, StoreConfig};
use ttlkv::connection::{handle_connection, ConnectionStats};
use ttlkv::protocol::ParserLimits;
use ttlkv::storage::SweepSchedule;
use ttlkv::KvService;

/// ttlkv server
#[derive(Parser, Debug)]
#[command(name = "ttlkv")]
#[command(about = "Transactional key-value store with per-key expiry")]
#[command(version)]
struct Args {
    /// Host to bind to
    #[arg(long, default_value = ttlkv::DEFAULT_HOST)]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = ttlkv::DEFAULT_PORT)]
    port: u16,

    /// Maximum concurrent store operations
    #[arg(long, default_value_t = 20)]
    pool_size: usize,

    /// How long an operation may queue for a session; 0 fails fast
    #[arg(long, default_value_t = 10_000)]
    pool_wait_ms: u64,

    /// How long an operation may wait for another one on the same key
    #[arg(long, default_value_t = 5_000)]
    lock_timeout_ms: u64,

    /// Five-field cron expression (UTC) for the expiry sweep
    #[arg(long, default_value = "0 0 * * *")]
    sweep_cron: String,
}

impl Args {
    fn store_config(&self) -> anyhow::Result<StoreConfig> {
        let schedule = SweepSchedule::cron(&self.sweep_cron)
            .with_context(|| format!("invalid --sweep-cron '{}'", self.sweep_cron))?;
        let pool_wait = match self.pool_wait_ms {
            0 => PoolWait::FailFast,
            ms => PoolWait::Bounded(Duration::from_millis(ms)),
        };
        anyhow::ensure!(self.pool_size > 0, "--pool-size must be at least 1");

        Ok(StoreConfig::default()
            .with_pool_size(self.pool_size)
            .with_pool_wait(pool_wait)
            .with_lock_timeout(Duration::from_millis(self.lock_timeout_ms))
            .with_sweep_schedule(schedule))
    }

    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).init();

    let args = Args::parse();
    let config = args.store_config()?;

    info!(version = ttlkv::VERSION, sweep = %config.sweep_schedule, "Starting ttlkv");

    let limits = ParserLimits {
        max_bulk_len: ParserLimits::default().max_bulk_len.max(config.max_value_len),
        ..ParserLimits::default()
    };
    let store = Arc::new(KvService::start(config));
    let stats = Arc::new(ConnectionStats::new());

    let listener = TcpListener::bind(args.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", args.bind_address()))?;
    info!("Listening on {}", args.bind_address());

    tokio::select! {
        _ = accept_loop(listener, Arc::clone(&store), limits, stats) => {}
        res = signal::ctrl_c() => {
            res.context("failed to listen for Ctrl+C")?;
            info!("Shutdown signal received, stopping server...");
        }
    }

    store.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Accepts clients forever, one task each.
async fn accept_loop(
    listener: TcpListener,
    store: Arc<KvService>,
    limits: ParserLimits,
    stats: Arc<ConnectionStats>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let commands = CommandHandler::new(Arc::clone(&store));
                let stats = Arc::clone(&stats);
                tokio::spawn(handle_connection(stream, addr, commands, limits, stats));
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
