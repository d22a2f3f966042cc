//! In-memory store for testing and ephemeral databases.

use crate::backend::{Store, StoreContext, TypeDescriptor, TypeTags};
use crate::error::StorageResult;
use crate::state::{StateContext, StoreState};
use crate::versioned::{TypeTable, VersionedMap};
use std::sync::Arc;

/// An in-memory, multi-version store.
///
/// This store keeps every committed version in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral databases that don't need persistence
///
/// Clones share the same data.
///
/// # Example
///
/// ```rust
/// use snapdb_storage::{MemStore, Store};
///
/// let store = MemStore::new();
/// let mut ctx = store.new_context(0).unwrap();
/// ctx.store(b"key", b"value");
/// ctx.commit(1).unwrap();
///
/// let reader = store.new_context(1).unwrap();
/// assert_eq!(reader.get(b"key").unwrap().unwrap().bytes, b"value");
/// ```
#[derive(Debug, Clone)]
pub struct MemStore {
    state: Arc<StoreState>,
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(StoreState::new(VersionedMap::new(), TypeTable::new(), None)),
        }
    }

    /// Returns the number of distinct keys ever written, tombstones included.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.state.key_count()
    }
}

impl Store for MemStore {
    fn register_type(&self, descriptor: &TypeDescriptor) -> StorageResult<TypeTags> {
        self.state.register_type(descriptor)
    }

    fn new_context(&self, snapshot: u64) -> StorageResult<Box<dyn StoreContext>> {
        Ok(Box::new(StateContext::open(Arc::clone(&self.state), snapshot)?))
    }

    fn last_snapshot(&self) -> u64 {
        self.state.last_snapshot()
    }

    fn compact(&self, horizon: u64) -> usize {
        self.state.compact(horizon)
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }

    fn close(&self) -> StorageResult<()> {
        self.state.close()
    }
}
