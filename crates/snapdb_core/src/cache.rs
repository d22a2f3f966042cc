//! Shared object cache.

use crate::error::CoreResult;
use crate::object::{CacheKey, ObjectHandle, ObjectRef};
use parking_lot::Mutex;
use snapdb_storage::StoreContext;
use std::collections::HashMap;
use std::sync::Arc;

/// Reference-counted handles for every object some transaction is using.
///
/// A handle stays cached exactly as long as its reference count is above
/// zero. Counts are only changed with the map locked, so a handle is never
/// removed while another thread is acquiring it.
#[derive(Debug, Default)]
pub(crate) struct ObjectCache {
    entries: Mutex<HashMap<CacheKey, Arc<ObjectHandle>>>,
}

impl ObjectCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns the handle for `reference`, taking one reference on it.
    ///
    /// With `load`, a handle seen for the first time is filled with the
    /// newest committed value. The fetch runs outside every lock; if another
    /// thread loaded or committed the object meanwhile, its state wins.
    pub(crate) fn acquire(
        &self,
        reference: &ObjectRef,
        context: &dyn StoreContext,
        load: bool,
    ) -> CoreResult<Arc<ObjectHandle>> {
        let handle = {
            let mut entries = self.entries.lock();
            let handle = entries
                .entry(reference.cache_key().clone())
                .or_insert_with(|| Arc::new(ObjectHandle::new(reference.clone())));
            handle.retain();
            Arc::clone(handle)
        };

        if load && !handle.is_loaded() {
            if let Err(err) = Self::load(&handle, context) {
                self.release([&handle]);
                return Err(err);
            }
        }
        Ok(handle)
    }

    /// Fills an unloaded handle from storage.
    pub(crate) fn load(handle: &ObjectHandle, context: &dyn StoreContext) -> CoreResult<()> {
        let stored = context.get_latest(handle.reference().cache_key().as_bytes())?;
        if handle.install_loaded(stored) {
            tracing::trace!(object = %handle.reference(), "loaded object");
        }
        Ok(())
    }

    /// Drops one reference per handle, evicting handles nobody uses.
    pub(crate) fn release<'a>(&self, handles: impl IntoIterator<Item = &'a Arc<ObjectHandle>>) {
        let mut entries = self.entries.lock();
        for handle in handles {
            if handle.release() > 0 {
                continue;
            }
            let key = handle.reference().cache_key();
            if entries.get(key).is_some_and(|cached| Arc::ptr_eq(cached, handle)) {
                entries.remove(key);
                tracing::trace!(object = %handle.reference(), "evicted object");
            }
        }
    }

    /// Removes every handle with no references. Returns how many.
    pub(crate) fn sweep(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, handle| handle.refcount() > 0);
        let removed = before - entries.len();
        if removed > 0 {
            tracing::warn!(removed, "sweep reclaimed unreferenced cache entries");
        }
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, key: &CacheKey) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Current reference count of a cached object.
    pub(crate) fn refcount(&self, key: &CacheKey) -> Option<usize> {
        self.entries.lock().get(key).map(|h| h.refcount())
    }
}
