//! Version chains.

use crate::object::reference::{CacheKey, ObjectRef};
use crate::sync::SpinLock;
use crate::types::SnapshotId;
use parking_lot::Mutex;
use snapdb_storage::StoredValue;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// One immutable committed state of an object.
///
/// The payload stays encoded; every transaction that reads it decodes its
/// own copy. An empty payload is the absent object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectVersion {
    owner: CacheKey,
    payload: Vec<u8>,
    snapshot: SnapshotId,
}

impl ObjectVersion {
    /// Returns the key of the owning object.
    #[must_use]
    pub fn owner(&self) -> &CacheKey {
        &self.owner
    }

    /// Returns the encoded payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Returns the snapshot that committed this version.
    #[must_use]
    pub fn snapshot(&self) -> SnapshotId {
        self.snapshot
    }
}

#[derive(Debug, Default)]
struct Chain {
    /// Newest first.
    versions: VecDeque<Arc<ObjectVersion>>,
    loaded: bool,
}

/// The cached, shared state of one object.
///
/// `refcount` is only changed while the cache map is locked. The spin lock
/// marks commit ownership; the chain itself sits behind a short mutex.
#[derive(Debug)]
pub(crate) struct ObjectHandle {
    reference: ObjectRef,
    refcount: AtomicUsize,
    lock: SpinLock,
    chain: Mutex<Chain>,
}

impl ObjectHandle {
    /// Creates an unloaded handle with no versions and no references.
    pub(crate) fn new(reference: ObjectRef) -> Self {
        Self {
            reference,
            refcount: AtomicUsize::new(0),
            lock: SpinLock::new(),
            chain: Mutex::new(Chain::default()),
        }
    }

    pub(crate) fn reference(&self) -> &ObjectRef {
        &self.reference
    }

    pub(crate) fn lock(&self) -> &SpinLock {
        &self.lock
    }

    pub(crate) fn refcount(&self) -> usize {
        self.refcount.load(Ordering::Acquire)
    }

    pub(crate) fn retain(&self) {
        self.refcount.fetch_add(1, Ordering::AcqRel);
    }

    /// Drops one reference and returns the remaining count.
    pub(crate) fn release(&self) -> usize {
        let previous = self.refcount.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "released {} more than acquired", self.reference);
        previous.saturating_sub(1)
    }

    pub(crate) fn is_loaded(&self) -> bool {
        self.chain.lock().loaded
    }

    /// Snapshot of the newest version, if loaded.
    pub(crate) fn head_snapshot(&self) -> Option<SnapshotId> {
        self.chain.lock().versions.front().map(|v| v.snapshot)
    }

    /// Number of versions currently held.
    #[cfg(test)]
    pub(crate) fn chain_len(&self) -> usize {
        self.chain.lock().versions.len()
    }

    /// Installs the value loaded from storage, unless someone beat us to it.
    ///
    /// Returns true if the value was installed.
    pub(crate) fn install_loaded(&self, stored: Option<StoredValue>) -> bool {
        let mut chain = self.chain.lock();
        if chain.loaded {
            return false;
        }
        let (snapshot, payload) = stored.map_or((0, Vec::new()), |s| (s.snapshot, s.bytes));
        chain.versions.push_back(Arc::new(ObjectVersion {
            owner: self.reference.cache_key().clone(),
            payload,
            snapshot: SnapshotId::new(snapshot),
        }));
        chain.loaded = true;
        true
    }

    /// Returns the newest version committed at or before `snapshot`.
    ///
    /// `None` means the chain does not reach back that far, either because
    /// older versions were trimmed or because the loaded value is newer.
    pub(crate) fn version_as_of(&self, snapshot: SnapshotId) -> Option<Arc<ObjectVersion>> {
        let chain = self.chain.lock();
        chain
            .versions
            .iter()
            .find(|v| v.snapshot <= snapshot)
            .cloned()
    }

    /// Pushes a committed version onto the head of the chain.
    ///
    /// The caller holds the spin lock. Versions no transaction at or after
    /// `horizon` can observe are trimmed.
    pub(crate) fn apply_version(&self, payload: Vec<u8>, snapshot: SnapshotId, horizon: SnapshotId) {
        debug_assert!(self.lock.is_locked(), "apply_version without the object lock");
        let mut chain = self.chain.lock();
        // A concurrent load may already have installed this commit from
        // storage.
        while chain.versions.front().is_some_and(|v| v.snapshot >= snapshot) {
            chain.versions.pop_front();
        }
        chain.versions.push_front(Arc::new(ObjectVersion {
            owner: self.reference.cache_key().clone(),
            payload,
            snapshot,
        }));
        chain.loaded = true;

        if let Some(keep) = chain.versions.iter().position(|v| v.snapshot <= horizon) {
            chain.versions.truncate(keep + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{TypeDef, TypeRegistry};
    use snapdb_codec::StringCodec;
    use snapdb_storage::MemStore;

    fn handle() -> ObjectHandle {
        let registry = TypeRegistry::new();
        registry
            .register(TypeDef::new("t"), Arc::new(StringCodec), &MemStore::new())
            .unwrap();
        ObjectHandle::new(ObjectRef::object(registry.get("t").unwrap(), "k"))
    }

    fn stored(snapshot: u64, bytes: &[u8]) -> Option<StoredValue> {
        Some(StoredValue {
            snapshot,
            bytes: bytes.to_vec(),
        })
    }

    #[test]
    fn new_handle_is_unloaded() {
        let h = handle();
        assert!(!h.is_loaded());
        assert_eq!(h.refcount(), 0);
        assert_eq!(h.head_snapshot(), None);
        assert!(h.version_as_of(SnapshotId::new(100)).is_none());
    }

    #[test]
    fn absent_key_loads_as_empty_version_zero() {
        let h = handle();
        assert!(h.install_loaded(None));
        let v = h.version_as_of(SnapshotId::new(0)).unwrap();
        assert!(v.payload().is_empty());
        assert_eq!(v.snapshot(), SnapshotId::new(0));
        assert_eq!(v.owner(), h.reference().cache_key());
    }

    #[test]
    fn second_install_is_ignored() {
        let h = handle();
        assert!(h.install_loaded(stored(3, b"a")));
        assert!(!h.install_loaded(stored(5, b"b")));
        assert_eq!(h.head_snapshot(), Some(SnapshotId::new(3)));
    }

    #[test]
    fn as_of_walks_back_from_head() {
        let h = handle();
        h.install_loaded(stored(1, b"one"));
        let _guard = h.lock().try_lock().unwrap();
        h.apply_version(b"three".to_vec(), SnapshotId::new(3), SnapshotId::new(0));

        assert_eq!(h.version_as_of(SnapshotId::new(2)).unwrap().payload(), b"one");
        assert_eq!(h.version_as_of(SnapshotId::new(3)).unwrap().payload(), b"three");
        assert!(h.version_as_of(SnapshotId::new(0)).is_none());
    }

    #[test]
    fn loaded_value_newer_than_reader_falls_off() {
        let h = handle();
        h.install_loaded(stored(7, b"x"));
        assert!(h.version_as_of(SnapshotId::new(6)).is_none());
    }

    #[test]
    fn apply_trims_below_horizon() {
        let h = handle();
        h.install_loaded(stored(1, b"1"));
        let _guard = h.lock().try_lock().unwrap();
        h.apply_version(b"2".to_vec(), SnapshotId::new(2), SnapshotId::new(0));
        h.apply_version(b"3".to_vec(), SnapshotId::new(3), SnapshotId::new(0));
        assert_eq!(h.chain_len(), 3);

        h.apply_version(b"4".to_vec(), SnapshotId::new(4), SnapshotId::new(3));
        assert_eq!(h.chain_len(), 2);
        assert_eq!(h.version_as_of(SnapshotId::new(3)).unwrap().payload(), b"3");
    }

    #[test]
    fn apply_replaces_concurrently_loaded_commit() {
        let h = handle();
        h.install_loaded(stored(5, b"five"));
        let _guard = h.lock().try_lock().unwrap();
        h.apply_version(b"five".to_vec(), SnapshotId::new(5), SnapshotId::new(0));
        assert_eq!(h.chain_len(), 1);
        assert_eq!(h.head_snapshot(), Some(SnapshotId::new(5)));
    }
}
