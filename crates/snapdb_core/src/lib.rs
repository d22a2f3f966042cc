//! # SnapDB Core
//!
//! Snapshot-isolated, multi-version object database engine.
//!
//! This crate provides:
//! - A type registry mapping names to codecs and declared links
//! - A shared, reference-counted object cache with per-object version chains
//! - Optimistic transactions validated at commit time
//! - Link sets with a reverse index for "who links here" queries
//!
//! Objects are addressed by a registered type name and a string key. Every
//! transaction reads as of a snapshot and commits only if nothing it
//! touched was committed by someone else in the meantime.
//!
//! ## Example
//!
//! ```rust
//! use serde::{Deserialize, Serialize};
//! use snapdb_core::{Database, TransactOutcome, TypeDef};
//!
//! #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
//! struct Account { balance: i64 }
//!
//! let db = Database::open_in_memory().unwrap();
//! db.register_type::<Account>(TypeDef::new("account")).unwrap();
//!
//! db.transact(|txn| {
//!     txn.set("account", "a", Account { balance: 100 })?;
//!     txn.set("account", "b", Account { balance: 0 })
//! }, None).unwrap();
//!
//! let outcome = db.transact(|txn| {
//!     if let Some(a) = txn.write::<Account>("account", "a")? {
//!         a.balance -= 30;
//!     }
//!     if let Some(b) = txn.write::<Account>("account", "b")? {
//!         b.balance += 30;
//!     }
//!     Ok(())
//! }, None).unwrap();
//! assert!(matches!(outcome, TransactOutcome::Committed(_)));
//!
//! let b: Option<Account> = db.read_one("account", "b").unwrap();
//! assert_eq!(b, Some(Account { balance: 30 }));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
mod database;
mod error;
mod object;
mod registry;
mod stats;
mod sync;
mod transaction;
mod types;

pub use config::Config;
pub use database::Database;
pub use error::{CoreError, CoreResult};
pub use object::{CacheKey, LinkSet, ObjectRef, ObjectVersion};
pub use registry::{LinkInfo, TypeDef, TypeInfo};
pub use stats::{DatabaseStats, StatsSnapshot};
pub use sync::{SpinGuard, SpinLock};
pub use transaction::{TransactOutcome, Transaction, TransactionState};
pub use types::{SnapshotId, TransactionId};

pub use snapdb_codec::{ObjectCodec, Record, RecordCodec, StringCodec};
pub use snapdb_storage::{LogStore, LogStoreOptions, MemStore, ResultSet, Store};
