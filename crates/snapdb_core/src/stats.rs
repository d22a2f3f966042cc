//! Database statistics and telemetry.
//!
//! # Usage
//!
//! ```rust
//! use snapdb_core::Database;
//!
//! let db = Database::open_in_memory().unwrap();
//! let mut txn = db.begin().unwrap();
//! txn.commit().unwrap();
//!
//! let stats = db.stats();
//! assert_eq!(stats.transactions_started, 1);
//! assert_eq!(stats.transactions_committed, 1);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Database statistics and metrics.
///
/// All counters are atomic and can be read while operations are in progress.
/// Values are monotonically increasing.
#[derive(Debug, Default)]
pub struct DatabaseStats {
    /// Total number of transactions started.
    transactions_started: AtomicU64,
    /// Total number of transactions committed, read-only ones included.
    transactions_committed: AtomicU64,
    /// Total number of transactions aborted by a write conflict.
    transactions_aborted: AtomicU64,
    /// Total number of transactions cancelled by the caller.
    transactions_cancelled: AtomicU64,
    /// Total number of commit attempts that found a lock taken.
    contention_retries: AtomicU64,
    /// Total number of object versions written to storage.
    versions_written: AtomicU64,
    /// Total number of backend failures during commit.
    errors: AtomicU64,
}

impl DatabaseStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a transaction start.
    pub(crate) fn record_transaction_start(&self) {
        self.transactions_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a transaction commit that wrote `versions` versions.
    pub(crate) fn record_transaction_commit(&self, versions: u64) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
        self.versions_written.fetch_add(versions, Ordering::Relaxed);
    }

    /// Records a transaction abort.
    pub(crate) fn record_transaction_abort(&self) {
        self.transactions_aborted.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a transaction cancellation.
    pub(crate) fn record_transaction_cancel(&self) {
        self.transactions_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a commit attempt that hit lock contention.
    pub(crate) fn record_contention(&self) {
        self.contention_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a backend failure.
    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the total number of transactions started.
    pub fn transactions_started(&self) -> u64 {
        self.transactions_started.load(Ordering::Relaxed)
    }

    /// Returns the total number of transactions committed.
    pub fn transactions_committed(&self) -> u64 {
        self.transactions_committed.load(Ordering::Relaxed)
    }

    /// Returns the total number of transactions aborted.
    pub fn transactions_aborted(&self) -> u64 {
        self.transactions_aborted.load(Ordering::Relaxed)
    }

    /// Returns the total number of transactions cancelled.
    pub fn transactions_cancelled(&self) -> u64 {
        self.transactions_cancelled.load(Ordering::Relaxed)
    }

    /// Returns the total number of contended commit attempts.
    pub fn contention_retries(&self) -> u64 {
        self.contention_retries.load(Ordering::Relaxed)
    }

    /// Returns the total number of versions written.
    pub fn versions_written(&self) -> u64 {
        self.versions_written.load(Ordering::Relaxed)
    }

    /// Returns the total number of backend failures.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            transactions_started: self.transactions_started(),
            transactions_committed: self.transactions_committed(),
            transactions_aborted: self.transactions_aborted(),
            transactions_cancelled: self.transactions_cancelled(),
            contention_retries: self.contention_retries(),
            versions_written: self.versions_written(),
            errors: self.errors(),
        }
    }
}

/// A point-in-time snapshot of database statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Total number of transactions started.
    pub transactions_started: u64,
    /// Total number of transactions committed.
    pub transactions_committed: u64,
    /// Total number of transactions aborted by a conflict.
    pub transactions_aborted: u64,
    /// Total number of transactions cancelled.
    pub transactions_cancelled: u64,
    /// Total number of contended commit attempts.
    pub contention_retries: u64,
    /// Total number of versions written.
    pub versions_written: u64,
    /// Total number of backend failures.
    pub errors: u64,
}
