//! Expiry sweep.
//!
//! A sweep deletes every persistent row whose expiry has passed, clears the
//! matching local slots, compacts the file and records when it ran. Two
//! bookkeeping slots in the local property map coordinate it:
//!
//! - `internal.clean.lastexecuted`: integer timestamp of the last sweep.
//! - `internal.clean.busy`: present while a sweep runs anywhere in the
//!   process. A sweep that finds it set leaves immediately.
//!
//! [`spawn_sweeper`] adds an optional periodic trigger on a tokio runtime.

use std::sync::atomic::Ordering;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::facade::SimpleCache;

const LAST_EXECUTED_SLOT: &str = "internal.clean.lastexecuted";
const BUSY_SLOT: &str = "internal.clean.busy";
const BUSY_VALUE: &str = "busy";

/// What a call to [`SimpleCache::check_cleanup`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// The sweep interval has not elapsed yet.
    NotDue,
    /// Another sweep holds the busy marker.
    AlreadyRunning,
    /// The cache is closed.
    Closed,
    /// Abort was requested part way through.
    Aborted { purged: u64 },
    /// The persistent tier could not be enumerated.
    Failed,
    Completed { purged: u64 },
}

/// Clears the busy marker when the sweep ends, however it ends.
struct BusyMarker<'a> {
    cache: &'a SimpleCache,
}

impl Drop for BusyMarker<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.cache.inner.local.clear_slot(BUSY_SLOT) {
            tracing::warn!(cache = %self.cache.config().log_prefix, error = %e, "Failed to clear sweep busy marker");
        }
    }
}

impl SimpleCache {
    /// Sweep if the configured interval has passed since the last sweep.
    ///
    /// A missing or unreadable last-sweep record counts as overdue and is
    /// reset to now.
    pub fn check_cleanup(&self) -> SweepOutcome {
        if self.is_closed() {
            return SweepOutcome::Closed;
        }

        let now = self.now();
        let log_prefix = &self.config().log_prefix;
        let interval_secs = i64::try_from(self.config().sweep_interval.as_secs()).unwrap_or(i64::MAX);

        let last = match self.inner.local.get_slot(LAST_EXECUTED_SLOT) {
            Ok(Some(raw)) => match raw.trim().parse::<i64>() {
                Ok(ts) => Some(ts),
                Err(e) => {
                    tracing::warn!(cache = %log_prefix, value = %raw, error = %e, "Unreadable last sweep time, resetting");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::debug!(cache = %log_prefix, error = %e, "Failed to read last sweep time");
                None
            }
        };

        match last {
            Some(last) if last.saturating_add(interval_secs) >= now => SweepOutcome::NotDue,
            Some(_) => self.sweep(),
            None => {
                self.record_sweep_time(now);
                self.sweep()
            }
        }
    }

    /// Run a sweep now, regardless of the interval.
    pub fn sweep(&self) -> SweepOutcome {
        if self.is_closed() {
            return SweepOutcome::Closed;
        }
        if self.abort_signal().is_requested() {
            return SweepOutcome::Aborted { purged: 0 };
        }
        let log_prefix = &self.config().log_prefix;

        match self.inner.local.set_slot_if_absent(BUSY_SLOT, BUSY_VALUE) {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(cache = %log_prefix, "Sweep already running");
                return SweepOutcome::AlreadyRunning;
            }
            Err(e) => {
                tracing::warn!(cache = %log_prefix, error = %e, "Failed to set sweep busy marker");
            }
        }
        let _marker = BusyMarker { cache: self };
        let _task = self.inner.tasks.register("cleanup");

        tracing::info!(cache = %log_prefix, "Running sweep");
        let now = self.now();
        let mut purged = 0u64;

        if let Some(store) = &self.inner.persistent {
            let rows = match store.list_expiries() {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::error!(cache = %log_prefix, error = %e, "Failed to enumerate persistent cache");
                    return SweepOutcome::Failed;
                }
            };

            for (key, expires) in rows {
                if self.inner.exit.load(Ordering::SeqCst) || self.abort_signal().is_requested() {
                    tracing::info!(cache = %log_prefix, purged, "Sweep interrupted");
                    return SweepOutcome::Aborted { purged };
                }
                if expires > now {
                    continue;
                }
                match store.delete_expired(&key, now) {
                    Ok(true) => {
                        purged += 1;
                        if let Err(e) = self.inner.local.delete(&key) {
                            tracing::debug!(cache = %log_prefix, key = %key, error = %e, "Failed to clear local slot");
                        }
                    }
                    Ok(false) => {
                        tracing::debug!(cache = %log_prefix, key = %key, "Entry rewritten since listing, keeping it");
                    }
                    Err(e) => {
                        tracing::warn!(cache = %log_prefix, key = %key, error = %e, "Failed to delete expired entry");
                    }
                }
            }

            if let Err(e) = store.vacuum() {
                tracing::warn!(cache = %log_prefix, error = %e, "Failed to compact persistent cache");
            }
        }

        self.record_sweep_time(self.now());
        tracing::info!(cache = %log_prefix, purged, "Sweep complete");
        SweepOutcome::Completed { purged }
    }

    fn record_sweep_time(&self, now: i64) {
        if let Err(e) = self.inner.local.set_slot(LAST_EXECUTED_SLOT, &now.to_string()) {
            tracing::warn!(cache = %self.config().log_prefix, error = %e, "Failed to record sweep time");
        }
    }
}

/// Counters reported by the periodic sweeper when it stops.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepMetrics {
    /// Ticks that ran `check_cleanup`.
    pub cycles: u64,
    /// Entries purged across all sweeps.
    pub purged: u64,
    /// Ticks that found another sweep running.
    pub skipped_busy: u64,
    /// Ticks whose sweep failed or whose blocking task panicked.
    pub errors: u64,
}

impl SweepMetrics {
    fn record(&mut self, outcome: SweepOutcome) {
        self.cycles += 1;
        match outcome {
            SweepOutcome::Completed { purged } | SweepOutcome::Aborted { purged } => {
                self.purged += purged;
            }
            SweepOutcome::AlreadyRunning => self.skipped_busy += 1,
            SweepOutcome::Failed => self.errors += 1,
            SweepOutcome::NotDue | SweepOutcome::Closed => {}
        }
    }
}

/// Periodically run [`SimpleCache::check_cleanup`] until `shutdown` flips to
/// `true` or the cache closes.
pub async fn sweep_task(
    cache: SimpleCache,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> SweepMetrics {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut metrics = SweepMetrics::default();
    let log_prefix = cache.config().log_prefix.clone();

    tracing::info!(cache = %log_prefix, period_secs = period.as_secs(), "Sweeper started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let worker = cache.clone();
                match tokio::task::spawn_blocking(move || worker.check_cleanup()).await {
                    Ok(SweepOutcome::Closed) => {
                        metrics.record(SweepOutcome::Closed);
                        break;
                    }
                    Ok(outcome) => metrics.record(outcome),
                    Err(e) => {
                        metrics.cycles += 1;
                        metrics.errors += 1;
                        tracing::error!(cache = %log_prefix, error = %e, "Sweep task failed");
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    tracing::info!(
        cache = %log_prefix,
        cycles = metrics.cycles,
        purged = metrics.purged,
        "Sweeper stopped"
    );
    metrics
}

/// Spawn [`sweep_task`] on the current tokio runtime.
pub fn spawn_sweeper(
    cache: SimpleCache,
    period: Duration,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<SweepMetrics> {
    tokio::spawn(sweep_task(cache, period, shutdown))
}
