//! State and contexts shared by the in-memory and log-backed stores.

use crate::backend::{StoreContext, StoredValue, TypeDescriptor, TypeTags};
use crate::error::{StorageError, StorageResult};
use crate::file::LogFile;
use crate::log::Frame;
use crate::result_set::ResultSet;
use crate::versioned::{TypeTable, VersionedMap, WriteBatch};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Everything a store owns: versioned data, tag table, optional log.
#[derive(Debug)]
pub(crate) struct StoreState {
    map: RwLock<VersionedMap>,
    types: Mutex<TypeTable>,
    log: Option<Mutex<LogFile>>,
    closed: AtomicBool,
}

impl StoreState {
    pub(crate) fn new(map: VersionedMap, types: TypeTable, log: Option<LogFile>) -> Self {
        Self {
            map: RwLock::new(map),
            types: Mutex::new(types),
            log: log.map(Mutex::new),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn register_type(&self, descriptor: &TypeDescriptor) -> StorageResult<TypeTags> {
        self.ensure_open()?;
        let mut types = self.types.lock();
        let mut next = types.clone();
        let (tags, changed) = next.register(descriptor)?;
        if changed {
            if let Some(log) = &self.log {
                log.lock().append(&Frame::Type {
                    name: descriptor.name.clone(),
                    tags: tags.clone(),
                })?;
            }
            *types = next;
            tracing::debug!(
                type_name = %descriptor.name,
                type_tag = tags.type_tag,
                links = tags.link_tags.len(),
                "allocated type tags"
            );
        }
        Ok(tags)
    }

    pub(crate) fn last_snapshot(&self) -> u64 {
        self.map.read().last_snapshot()
    }

    pub(crate) fn key_count(&self) -> usize {
        self.map.read().key_count()
    }

    pub(crate) fn compact(&self, horizon: u64) -> usize {
        let removed = self.map.write().compact(horizon);
        if removed > 0 {
            tracing::trace!(horizon, removed, "compacted version history");
        }
        removed
    }

    fn commit(&self, batch: &WriteBatch, snapshot: u64) -> StorageResult<()> {
        self.ensure_open()?;
        if batch.is_empty() {
            return Ok(());
        }
        match &self.log {
            Some(log) => {
                // Holding the log lock orders appends and application.
                let mut log = log.lock();
                log.append(&Frame::Batch {
                    snapshot,
                    batch: batch.clone(),
                })?;
                self.map.write().apply(batch, snapshot);
            }
            None => self.map.write().apply(batch, snapshot),
        }
        Ok(())
    }

    pub(crate) fn close(&self) -> StorageResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(log) = &self.log {
            log.lock().sync()?;
        }
        Ok(())
    }
}

/// A [`StoreContext`] over a [`StoreState`].
pub(crate) struct StateContext {
    state: Arc<StoreState>,
    snapshot: u64,
    batch: WriteBatch,
}

impl StateContext {
    pub(crate) fn open(state: Arc<StoreState>, snapshot: u64) -> StorageResult<Self> {
        state.ensure_open()?;
        Ok(Self {
            state,
            snapshot,
            batch: WriteBatch::new(),
        })
    }
}

impl StoreContext for StateContext {
    fn snapshot(&self) -> u64 {
        self.snapshot
    }

    fn get(&self, key: &[u8]) -> StorageResult<Option<StoredValue>> {
        self.state.ensure_open()?;
        Ok(self.state.map.read().get_as_of(key, self.snapshot))
    }

    fn get_latest(&self, key: &[u8]) -> StorageResult<Option<StoredValue>> {
        self.state.ensure_open()?;
        Ok(self.state.map.read().get_latest(key))
    }

    fn store(&mut self, key: &[u8], value: &[u8]) {
        self.batch.store(key, value);
    }

    fn add_index(&mut self, target: &[u8], source: &str) {
        self.batch.add_index(target, source);
    }

    fn remove_index(&mut self, target: &[u8], source: &str) {
        self.batch.remove_index(target, source);
    }

    fn find_slice(
        &self,
        target: &[u8],
        from: &str,
        limit: Option<usize>,
    ) -> StorageResult<ResultSet> {
        self.state.ensure_open()?;
        let keys = self
            .state
            .map
            .read()
            .scan_index(target, from, limit, self.snapshot)?;
        Ok(ResultSet::new(keys))
    }

    fn list_slice(
        &self,
        prefix: &[u8],
        from: &str,
        limit: Option<usize>,
    ) -> StorageResult<ResultSet> {
        self.state.ensure_open()?;
        let keys = self
            .state
            .map
            .read()
            .scan_values(prefix, from, limit, self.snapshot)?;
        Ok(ResultSet::new(keys))
    }

    fn pending(&self) -> usize {
        self.batch.len()
    }

    fn commit(self: Box<Self>, snapshot: u64) -> StorageResult<()> {
        self.state.commit(&self.batch, snapshot)
    }

    fn rollback(self: Box<Self>) {}
}
