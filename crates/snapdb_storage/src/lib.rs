//! # SnapDB Storage
//!
//! Storage contract and reference backends for SnapDB.
//!
//! Stores are **opaque byte stores** with versioned history: every committed
//! batch is tagged with a snapshot id, and a [`StoreContext`] bound to a
//! snapshot id only sees commits at or below it.
//!
//! ## Design Principles
//!
//! - Keys and payloads are produced and interpreted by the engine
//! - Secondary index entries map a target key to source keys
//! - Batches are atomic
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Backends
//!
//! - [`MemStore`] - For testing and ephemeral databases
//! - [`LogStore`] - Persistent store replayed from a CRC-framed batch log
//!
//! ## Example
//!
//! ```rust
//! use snapdb_storage::{MemStore, Store};
//!
//! let store = MemStore::new();
//! let mut ctx = store.new_context(0).unwrap();
//! ctx.store(b"k", b"hello");
//! ctx.add_index(b"target", "k");
//! ctx.commit(1).unwrap();
//!
//! let ctx = store.new_context(1).unwrap();
//! assert_eq!(ctx.get(b"k").unwrap().unwrap().bytes, b"hello");
//! assert_eq!(ctx.find(b"target").unwrap().all(), vec!["k"]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod log;
mod memory;
mod result_set;
mod state;
mod versioned;

pub use backend::{Store, StoreContext, StoredValue, TypeDescriptor, TypeTags};
pub use error::{StorageError, StorageResult};
pub use file::{LogStore, LogStoreOptions};
pub use memory::MemStore;
pub use result_set::ResultSet;
pub use versioned::{index_key, BatchOp, VersionedMap, WriteBatch};
