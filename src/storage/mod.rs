//! Storage Module
//!
//! The transactional core of ttlkv: a bounded session pool, per-key locks,
//! the store engine, and the scheduled expiry sweeper.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      StoreEngine                            │
//! │         get / put / delete under one key lock               │
//! └──────────────┬──────────────────────────────┬───────────────┘
//!                │ begin / commit / rollback    │ lock(key)
//!                ▼                              ▼
//! ┌──────────────────────────────┐   ┌─────────────────────────┐
//! │       SessionManager         │   │        KeyLocks         │
//! │  bounded pool of Sessions    │   │  exclusive, per key     │
//! └──────────────┬───────────────┘   └─────────────────────────┘
//!                │ fetch / apply
//!                ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Backend (MemoryBackend: 64 shards)             │
//! └─────────────────────────────────────────────────────────────┘
//!                ▲
//!                │ one PurgeExpired per run, own session
//!  ┌─────────────┴─────────────┐
//!  │      ExpirySweeper        │
//!  │ (cron-scheduled Tokio task)│
//!  └───────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use ttlkv::clock::{Clock, SystemClock};
//! use ttlkv::config::StoreConfig;
//! use ttlkv::storage::{MemoryBackend, SessionManager, StoreEngine};
//! use bytes::Bytes;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let config = StoreConfig::default();
//! let sessions = Arc::new(SessionManager::new(
//!     Arc::new(MemoryBackend::new()),
//!     config.pool_size,
//!     config.pool_wait,
//! ));
//! let engine = StoreEngine::new(sessions, Arc::new(SystemClock), &config);
//!
//! engine.put("session", Bytes::from("token123"), SystemClock.now() + 3600).await?;
//! assert_eq!(engine.get("session").await?.unwrap().value, Bytes::from("token123"));
//!
//! engine.delete("session").await?;
//! assert!(engine.get("session").await?.is_none());
//! # Ok::<(), ttlkv::StoreError>(())
//! # }).unwrap();
//! ```

pub mod backend;
pub mod engine;
pub mod expiry;
pub mod locks;
pub mod record;
pub mod schedule;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use backend::{Backend, MemoryBackend, Mutation};
pub use engine::{EngineStats, StoreEngine};
pub use expiry::{ExpirySweeper, SweepStats};
pub use locks::{KeyLockGuard, KeyLocks};
pub use record::{Record, Row, TOMBSTONE};
pub use schedule::{CronSchedule, ScheduleError, SweepSchedule};
pub use session::{Session, SessionManager, Transaction};
