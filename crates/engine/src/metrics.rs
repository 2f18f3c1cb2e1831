//! Transaction counters shared by every coordinator of a manager
//!
//! # Memory Ordering
//!
//! Counters use Relaxed ordering: they are observational only and do not
//! synchronize any other memory operations.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    active_count: AtomicU64,
    total_started: AtomicU64,
    total_committed: AtomicU64,
    total_aborted: AtomicU64,
    compensations_run: AtomicU64,
    compensation_failures: AtomicU64,
    backends_reversed: AtomicU64,
    entities_skipped: AtomicU64,
}

impl MetricsRecorder {
    /// Fresh counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Record transaction start
    pub fn record_start(&self) {
        self.active_count.fetch_add(1, Ordering::Relaxed);
        self.total_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record transaction commit
    ///
    /// Decrements active count (saturating at 0) and increments committed count.
    pub fn record_commit(&self) {
        self.finish();
        self.total_committed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record transaction abort
    pub fn record_abort(&self) {
        self.finish();
        self.total_aborted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a transaction that ended without committing or aborting
    /// (read-only or abandoned)
    pub fn record_release(&self) {
        self.finish();
    }

    /// Record one compensation pass
    ///
    /// # Arguments
    ///
    /// * `reversed` - Backends fully reversed
    /// * `skipped` - Entities left alone for lack of a snapshot
    /// * `failures` - Backends that could not be reversed
    pub fn record_compensation(&self, reversed: usize, skipped: usize, failures: usize) {
        self.compensations_run.fetch_add(1, Ordering::Relaxed);
        self.backends_reversed
            .fetch_add(reversed as u64, Ordering::Relaxed);
        self.entities_skipped
            .fetch_add(skipped as u64, Ordering::Relaxed);
        self.compensation_failures
            .fetch_add(failures as u64, Ordering::Relaxed);
    }

    fn finish(&self) {
        let _ = self
            .active_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |x| {
                Some(x.saturating_sub(1))
            });
    }

    /// Snapshot of current counters
    pub fn snapshot(&self) -> TransactionMetrics {
        let started = self.total_started.load(Ordering::Relaxed);
        let committed = self.total_committed.load(Ordering::Relaxed);

        TransactionMetrics {
            active_count: self.active_count.load(Ordering::Relaxed),
            total_started: started,
            total_committed: committed,
            total_aborted: self.total_aborted.load(Ordering::Relaxed),
            compensations_run: self.compensations_run.load(Ordering::Relaxed),
            compensation_failures: self.compensation_failures.load(Ordering::Relaxed),
            backends_reversed: self.backends_reversed.load(Ordering::Relaxed),
            entities_skipped: self.entities_skipped.load(Ordering::Relaxed),
            commit_rate: if started > 0 {
                committed as f64 / started as f64
            } else {
                0.0
            },
        }
    }
}

/// Transaction metrics
///
/// Provides statistics about transaction lifecycle and compensation.
#[derive(Debug, Clone)]
pub struct TransactionMetrics {
    /// Number of currently open transactions
    pub active_count: u64,
    /// Total number of transactions started
    pub total_started: u64,
    /// Total number of transactions committed
    pub total_committed: u64,
    /// Total number of transactions aborted
    pub total_aborted: u64,
    /// Compensation passes run after a failed commit
    pub compensations_run: u64,
    /// Backends that could not be reversed
    pub compensation_failures: u64,
    /// Backends reversed by compensation
    pub backends_reversed: u64,
    /// Entities compensation skipped for lack of a snapshot
    pub entities_skipped: u64,
    /// Commit success rate (committed / started)
    pub commit_rate: f64,
}

impl TransactionMetrics {
    /// Total transactions that completed (committed + aborted)
    pub fn total_completed(&self) -> u64 {
        self.total_committed + self.total_aborted
    }

    /// Abort rate (aborted / started)
    pub fn abort_rate(&self) -> f64 {
        if self.total_started > 0 {
            self.total_aborted as f64 / self.total_started as f64
        } else {
            0.0
        }
    }
}
