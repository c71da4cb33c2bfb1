//! Store Service
//!
//! [`KvService`] owns everything a running store needs: the backend, the
//! session pool, the engine and the expiry sweeper. It is built once at
//! startup and torn down explicitly with [`KvService::shutdown`]; nothing is
//! kept in globals.
//!
//! Each call runs on its own Tokio task. If the caller goes away mid-call the
//! operation still runs to commit or rollback and its result is discarded.

use crate::clock::{Clock, SystemClock};
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::storage::{
    Backend, EngineStats, ExpirySweeper, MemoryBackend, Record, SessionManager, StoreEngine,
    SweepStats,
};
use bytes::Bytes;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

/// Snapshot of store activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub engine: EngineStats,
    pub sweeper: SweepStats,
    /// Rows physically stored, including expired rows awaiting a sweep
    pub rows: usize,
    /// Sessions currently checked out
    pub sessions_in_use: usize,
}

/// A running key-value store.
///
/// # Example
///
/// ```rust,no_run
/// use ttlkv::{KvService, StoreConfig};
///
/// #[tokio::main]
/// async fn main() -> ttlkv::Result<()> {
///     let store = KvService::start(StoreConfig::default());
///
///     store.write("a", "1", store.now() + 60).await?;
///     let record = store.read("a").await?.unwrap();
///     assert_eq!(&record.value[..], b"1");
///
///     store.remove("a").await?;
///     store.shutdown().await;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct KvService {
    engine: Arc<StoreEngine>,
    sessions: Arc<SessionManager>,
    sweeper: Mutex<Option<ExpirySweeper>>,
}

impl KvService {
    /// Starts an in-memory store on the system clock.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context; the sweeper
    /// needs a runtime to spawn on.
    pub fn start(config: StoreConfig) -> Self {
        Self::with_parts(config, Arc::new(MemoryBackend::new()), Arc::new(SystemClock))
    }

    /// Starts a store on the given backend and clock.
    pub fn with_parts(config: StoreConfig, backend: Arc<dyn Backend>, clock: Arc<dyn Clock>) -> Self {
        let sessions = Arc::new(SessionManager::new(backend, config.pool_size, config.pool_wait));
        let engine = Arc::new(StoreEngine::new(
            Arc::clone(&sessions),
            Arc::clone(&clock),
            &config,
        ));
        let sweeper = ExpirySweeper::start(Arc::clone(&sessions), clock, config.sweep_schedule.clone());

        info!(
            pool_size = sessions.capacity(),
            lock_timeout_ms = config.lock_timeout.as_millis(),
            "Store started"
        );

        Self {
            engine,
            sessions,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    /// Returns the live record for `key`, or `None` if absent or expired.
    pub async fn read(&self, key: impl Into<String>) -> Result<Option<Record>> {
        let engine = Arc::clone(&self.engine);
        let key = key.into();
        run_detached(async move { engine.get(&key).await }).await
    }

    /// Stores `value` under `key` until `expires_at` (epoch seconds),
    /// replacing any previous value and expiry.
    pub async fn write(
        &self,
        key: impl Into<String>,
        value: impl Into<Bytes>,
        expires_at: i64,
    ) -> Result<()> {
        let engine = Arc::clone(&self.engine);
        let (key, value) = (key.into(), value.into());
        run_detached(async move { engine.put(&key, value, expires_at).await }).await
    }

    /// Removes `key`. Succeeds whether or not the key exists.
    pub async fn remove(&self, key: impl Into<String>) -> Result<()> {
        let engine = Arc::clone(&self.engine);
        let key = key.into();
        run_detached(async move { engine.delete(&key).await }).await
    }

    /// Current store time in epoch seconds.
    pub fn now(&self) -> i64 {
        self.engine.now()
    }

    pub fn stats(&self) -> StoreStats {
        let sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(ExpirySweeper::stats)
            .unwrap_or_default();

        StoreStats {
            engine: self.engine.stats(),
            sweeper,
            rows: self.sessions.backend().row_count().unwrap_or(0),
            sessions_in_use: self.sessions.in_use(),
        }
    }

    /// Stops the sweeper, then drains in-flight operations and closes the
    /// session pool. Later calls fail with `PoolClosed`.
    pub async fn shutdown(&self) {
        let sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sweeper) = sweeper {
            sweeper.shutdown().await;
        }
        self.sessions.close().await;
        info!("Store shut down");
    }
}

/// Runs `op` on its own task so that dropping the caller's future cannot
/// interrupt an open transaction.
async fn run_detached<T, F>(op: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(op)
        .await
        .map_err(|e| StoreError::Storage(format!("operation task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::SweepSchedule;
    use std::time::Duration;

    const T0: i64 = 1_700_000_000;

    fn start(schedule: SweepSchedule) -> (KvService, ManualClock, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let clock = ManualClock::new(T0);
        let config = StoreConfig::default().with_sweep_schedule(schedule);
        let service = KvService::with_parts(config, backend.clone(), Arc::new(clock.clone()));
        (service, clock, backend)
    }

    #[tokio::test]
    async fn test_write_read_expire_sweep_scenario() {
        let (store, clock, backend) =
            start(SweepSchedule::Interval(Duration::from_millis(20)));

        store.write("a", "1", clock.now() + 60).await.unwrap();
        let record = store.read("a").await.unwrap().unwrap();
        assert_eq!(record.key, "a");
        assert_eq!(record.value, Bytes::from("1"));

        clock.advance(61);
        assert_eq!(store.read("a").await.unwrap(), None);

        // next sweep removes the physical row
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(backend.row_count().unwrap(), 0);
        assert!(store.stats().sweeper.rows_purged >= 1);

        store.shutdown().await;
    }

    #[tokio::test]
    async fn test_remove_is_immediate_and_idempotent() {
        let (store, clock, backend) = start(SweepSchedule::default());

        store.write("k", "v", clock.now() + 600).await.unwrap();
        store.remove("k").await.unwrap();
        assert_eq!(store.read("k").await.unwrap(), None);

        store.remove("k").await.unwrap();
        store.remove("never-written").await.unwrap();

        // tombstone waits for the daily sweep
        assert_eq!(backend.row_count().unwrap(), 1);
        store.shutdown().await;
    }

    #[tokio::test]
    async fn test_sweep_only_touches_expired_rows() {
        let (store, clock, backend) =
            start(SweepSchedule::Interval(Duration::from_millis(20)));

        store.write("short", "v", clock.now() + 10).await.unwrap();
        store.write("long", "v", clock.now() + 1000).await.unwrap();
        clock.advance(10);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(backend.row_count().unwrap(), 1);
        assert_eq!(
            store.read("long").await.unwrap().unwrap().expires_at,
            T0 + 1000
        );
        store.shutdown().await;
    }

    #[tokio::test]
    async fn test_stats() {
        let (store, clock, _) = start(SweepSchedule::default());

        store.write("k", "v", clock.now() + 60).await.unwrap();
        store.read("k").await.unwrap();
        store.remove("k").await.unwrap();

        let stats = store.stats();
        assert_eq!(stats.engine.put_ops, 1);
        assert_eq!(stats.engine.get_ops, 1);
        assert_eq!(stats.engine.delete_ops, 1);
        assert_eq!(stats.engine.tombstones, 1);
        assert_eq!(stats.rows, 1);
        assert_eq!(stats.sessions_in_use, 0);
        store.shutdown().await;
    }

    #[tokio::test]
    async fn test_operations_fail_after_shutdown() {
        let (store, clock, _) = start(SweepSchedule::default());
        store.shutdown().await;

        let err = store.write("k", "v", clock.now() + 60).await.unwrap_err();
        assert_eq!(err, StoreError::PoolClosed);
        // a second shutdown is harmless
        store.shutdown().await;
    }
}
