//! Shared setup for SnapDB benchmarks.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use rand::Rng;
use serde::{Deserialize, Serialize};
use snapdb_core::{Database, TypeDef};

/// Type name of [`Blob`] records.
pub const BLOB: &str = "blob";

/// Type name of [`Counter`] records.
pub const COUNTER: &str = "counter";

/// Link from a blob to other blobs.
pub const REFS: &str = "refs";

/// An opaque payload of configurable size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    /// Raw content.
    pub data: Vec<u8>,
}

/// A counter incremented by the contention benchmarks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    /// Current value.
    pub value: u64,
}

/// Generate random data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Opens an in-memory database with the benchmark types registered.
///
/// # Panics
///
/// Panics if the database cannot be opened.
pub fn bench_db() -> Database {
    let db = Database::open_in_memory().expect("open in-memory database");
    db.register_type::<Blob>(TypeDef::new(BLOB).link(REFS, BLOB))
        .expect("register blob");
    db.register_type::<Counter>(TypeDef::new(COUNTER))
        .expect("register counter");
    db
}

/// Increments `key`, retrying until it commits.
///
/// # Panics
///
/// Panics if the transaction fails.
pub fn increment(db: &Database, key: &str) {
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
    .expect("increment");
}
