//! Stress drivers for SnapDB.
//!
//! These run many concurrent counter increments and report what the
//! database did, so tests can check that no update was lost.

use crate::fixtures::{Counter, COUNTER};
use snapdb_core::{CoreResult, Database, TransactOutcome};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Increments that committed.
    pub committed: u64,
    /// Attempts aborted by conflicts and retried.
    pub aborted: u64,
    /// Commits that had to back off for a lock.
    pub contention_retries: u64,
    /// Total duration.
    pub duration: Duration,
    /// Committed increments per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    fn new(committed: u64, aborted: u64, contention_retries: u64, duration: Duration) -> Self {
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            committed as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            committed,
            aborted,
            contention_retries,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {name} ===");
        println!("Committed: {}", self.committed);
        println!("Aborted and retried: {}", self.aborted);
        println!("Contention retries: {}", self.contention_retries);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Which counters the threads of a stress run increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMode {
    /// Every thread has a counter of its own.
    Disjoint,
    /// All threads share a single counter.
    Shared,
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of concurrent threads.
    pub threads: usize,
    /// Increments performed by each thread.
    pub increments: usize,
    /// Counter assignment.
    pub mode: KeyMode,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            increments: 100,
            mode: KeyMode::Disjoint,
        }
    }
}

impl StressConfig {
    /// Key of the counter thread `thread` increments.
    #[must_use]
    pub fn key_for(&self, thread: usize) -> String {
        match self.mode {
            KeyMode::Disjoint => format!("counter-{thread}"),
            KeyMode::Shared => "shared".to_string(),
        }
    }

    /// Value every counter should hold after a run.
    #[must_use]
    pub fn expected_value(&self) -> u64 {
        let per_key = match self.mode {
            KeyMode::Disjoint => self.increments,
            KeyMode::Shared => self.threads * self.increments,
        };
        per_key as u64
    }
}

/// Increments a counter, creating it at 1 if absent.
///
/// # Errors
///
/// Propagates backend and registry errors from [`Database::transact`].
pub fn increment(db: &Database, key: &str) -> CoreResult<TransactOutcome> {
    db.transact(
        |txn| {
            if let Some(counter) = txn.write::<Counter>(COUNTER, key)? {
                counter.value += 1;
                return Ok(());
            }
            txn.set(COUNTER, key, Counter { value: 1 })
        },
        None,
    )
}

/// Reads a counter, treating an absent one as zero.
///
/// # Errors
///
/// Propagates read errors.
pub fn counter_value(db: &Database, key: &str) -> CoreResult<u64> {
    Ok(db
        .read_one::<Counter>(COUNTER, key)?
        .map_or(0, |c| c.value))
}

/// Runs `config.threads` threads each incrementing its counter
/// `config.increments` times.
///
/// # Panics
///
/// Panics if any increment fails or does not commit.
pub fn concurrent_increments(db: &Database, config: &StressConfig) -> StressTestResult {
    let before = db.stats();
    let start = Instant::now();

    thread::scope(|scope| {
        for t in 0..config.threads {
            let key = config.key_for(t);
            scope.spawn(move || {
                for _ in 0..config.increments {
                    let outcome = increment(db, &key).expect("Increment failed");
                    assert!(outcome.is_committed(), "increment ended {outcome:?}");
                }
            });
        }
    });

    let duration = start.elapsed();
    let after = db.stats();
    StressTestResult::new(
        after.transactions_committed - before.transactions_committed,
        after.transactions_aborted - before.transactions_aborted,
        after.contention_retries - before.contention_retries,
        duration,
    )
}
