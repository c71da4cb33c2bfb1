//! Background Expiry Sweeper
//!
//! Reads never return expired rows, but they never remove them either. The
//! sweeper is what physically reclaims them, tombstones included.
//!
//! ## Design
//!
//! The sweeper runs as a Tokio task and:
//! 1. Sleeps until the next tick of its [`SweepSchedule`] (default: daily at 00:00 UTC)
//! 2. Starts a run, unless the previous run is still going (the tick is then skipped)
//! 3. The run takes its own session, stages a single `PurgeExpired` for every
//!    row with `expires_at <= now`, and commits
//! 4. Logs the outcome; a failed run is not retried, the next tick is the retry
//!
//! One bulk purge per run is cheaper than a delete per key and touches each
//! shard once.

use crate::clock::Clock;
use crate::error::Result;
use crate::storage::backend::Mutation;
use crate::storage::schedule::SweepSchedule;
use crate::storage::session::SessionManager;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Sweeper counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Runs that committed
    pub runs: u64,
    /// Runs that failed and were rolled back
    pub failures: u64,
    /// Ticks skipped because a run was still in progress
    pub skipped: u64,
    /// Rows physically removed so far
    pub rows_purged: u64,
}

#[derive(Debug)]
struct Sweep {
    sessions: Arc<SessionManager>,
    clock: Arc<dyn Clock>,
    running: AtomicBool,
    runs: AtomicU64,
    failures: AtomicU64,
    skipped: AtomicU64,
    rows_purged: AtomicU64,
}

/// Marks a run in progress; clears the mark on drop.
struct RunGuard {
    sweep: Arc<Sweep>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.sweep.running.store(false, Ordering::Release);
    }
}

impl Sweep {
    fn new(sessions: Arc<SessionManager>, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions,
            clock,
            running: AtomicBool::new(false),
            runs: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            rows_purged: AtomicU64::new(0),
        }
    }

    /// Claims the right to run, or `None` if a run is already in progress.
    fn try_begin(sweep: &Arc<Sweep>) -> Option<RunGuard> {
        sweep
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard {
                sweep: Arc::clone(sweep),
            })
    }

    /// One batched purge in one transaction on one session.
    async fn run_once(&self) -> Result<u64> {
        let cutoff = self.clock.now();
        let mut session = self.sessions.acquire().await?;
        let mut tx = session.begin();
        tx.stage(Mutation::PurgeExpired { cutoff });
        tx.commit()
    }

    async fn run_and_record(&self) {
        match self.run_once().await {
            Ok(purged) => {
                self.runs.fetch_add(1, Ordering::Relaxed);
                self.rows_purged.fetch_add(purged, Ordering::Relaxed);
                info!(purged = purged, "Expiry sweep completed");
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, "Expiry sweep failed, waiting for next tick");
            }
        }
    }

    fn stats(&self) -> SweepStats {
        SweepStats {
            runs: self.runs.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            rows_purged: self.rows_purged.load(Ordering::Relaxed),
        }
    }
}

/// A handle to the running expiry sweeper.
///
/// When this handle is dropped, the sweeper task will be stopped.
#[derive(Debug)]
pub struct ExpirySweeper {
    /// Sender to signal shutdown
    shutdown_tx: watch::Sender<bool>,
    sweep: Arc<Sweep>,
    task: Option<JoinHandle<()>>,
}

impl ExpirySweeper {
    /// Starts the expiry sweeper as a background task.
    ///
    /// # Arguments
    ///
    /// * `sessions` - The pool the sweeper takes its session from
    /// * `clock` - Store clock; a run purges rows expired as of its start
    /// * `schedule` - When runs fire
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    pub fn start(
        sessions: Arc<SessionManager>,
        clock: Arc<dyn Clock>,
        schedule: SweepSchedule,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweep = Arc::new(Sweep::new(sessions, clock));

        info!(schedule = %schedule, "Background expiry sweeper started");
        let task = tokio::spawn(sweeper_loop(Arc::clone(&sweep), schedule, shutdown_rx));

        Self {
            shutdown_tx,
            sweep,
            task: Some(task),
        }
    }

    /// Stops the expiry sweeper. A run already in progress finishes.
    ///
    /// This is called automatically when the handle is dropped.
    pub fn stop(&self) {
        let changed = self.shutdown_tx.send_if_modified(|stopped| {
            let first = !*stopped;
            *stopped = true;
            first
        });
        if changed {
            info!("Background expiry sweeper stopped");
        }
    }

    /// Stops the sweeper and waits for an in-progress run to finish.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Expiry sweeper task ended abnormally");
            }
        }
    }

    pub fn stats(&self) -> SweepStats {
        self.sweep.stats()
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The main sweeper loop.
async fn sweeper_loop(
    sweep: Arc<Sweep>,
    schedule: SweepSchedule,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut in_flight: Option<JoinHandle<()>> = None;

    loop {
        let Some(delay) = schedule.next_delay(sweep.clock.now()) else {
            warn!(schedule = %schedule, "Sweep schedule never fires, sweeper exiting");
            break;
        };

        // Wait for the next tick or shutdown signal
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper received shutdown signal");
                    break;
                }
                continue;
            }
        }

        match Sweep::try_begin(&sweep) {
            Some(guard) => {
                let run = Arc::clone(&sweep);
                in_flight = Some(tokio::spawn(async move {
                    let _guard = guard;
                    run.run_and_record().await;
                }));
            }
            None => {
                sweep.skipped.fetch_add(1, Ordering::Relaxed);
                warn!("Previous expiry sweep still running, skipping tick");
            }
        }
    }

    if let Some(run) = in_flight {
        let _ = run.await;
    }
}
