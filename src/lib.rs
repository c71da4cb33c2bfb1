//! # ttlkv - A Transactional Key-Value Store with Expiry
//!
//! Every key carries an absolute expiry. Reads never return an expired value,
//! deletes are logical (the row's expiry is moved into the past), and a
//! scheduled sweeper reclaims everything that has expired in one batch.
//!
//! ## Features
//!
//! - **Per-key serializability**: each operation is one transaction holding
//!   an exclusive lock on its key
//! - **Bounded concurrency**: a fixed session pool with fail-fast or bounded
//!   waits
//! - **Read-time TTL**: liveness is checked on every read against the store
//!   clock
//! - **Scheduled sweeps**: cron-driven, never overlapping
//! - **RESP façade**: talk to it with `redis-cli`
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                ttlkv                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │                  │
//! │  │ (main.rs)   │    │  Handler    │    │  Handler    │                  │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘                  │
//! │                                               │                         │
//! │                                               ▼                         │
//! │                     ┌──────────────────────────────────────────────┐    │
//! │                     │  KvService ── StoreEngine ── KeyLocks        │    │
//! │                     │                   │                          │    │
//! │                     │             SessionManager                   │    │
//! │                     │                   │                          │    │
//! │                     │              Backend (64 shards)             │    │
//! │                     └──────────────────────────────────────────────┘    │
//! │                                         ▲                               │
//! │                     ┌───────────────────┴─────────────────────────┐     │
//! │                     │   ExpirySweeper (cron, background task)     │     │
//! │                     └─────────────────────────────────────────────┘     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ttlkv::{KvService, StoreConfig};
//!
//! #[tokio::main]
//! async fn main() -> ttlkv::Result<()> {
//!     let store = KvService::start(StoreConfig::default());
//!
//!     store.write("a", "1", store.now() + 60).await?;
//!     assert!(store.read("a").await?.is_some());
//!
//!     store.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: backend, sessions, key locks, engine and sweeper
//! - [`service`]: the assembled store
//! - [`protocol`], [`commands`], [`connection`]: the RESP façade
//! - [`config`], [`clock`], [`error`]: shared plumbing

pub mod clock;
pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod service;
pub mod storage;

// Re-export commonly used types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use commands::CommandHandler;
pub use config::{PoolWait, StoreConfig};
pub use connection::{handle_connection, ConnectionStats};
pub use error::{ErrorKind, Result, StoreError};
pub use service::{KvService, StoreStats};
pub use storage::{Record, SweepSchedule};

/// The default port ttlkv listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host ttlkv binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of ttlkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
