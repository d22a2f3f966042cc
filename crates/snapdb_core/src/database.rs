//! Database facade.

use crate::cache::ObjectCache;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::object::{CacheKey, ObjectRef};
use crate::registry::{TypeDef, TypeInfo, TypeRegistry};
use crate::stats::{DatabaseStats, StatsSnapshot};
use crate::transaction::{TransactOutcome, Transaction, TransactionManager, TransactionState};
use crate::types::SnapshotId;
use snapdb_codec::{decode_links, ObjectCodec, Record, RecordCodec};
use snapdb_storage::{LogStore, LogStoreOptions, MemStore, Store, StoredValue};
use std::any::TypeId;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// State shared by a database and its transactions.
pub(crate) struct Shared {
    pub(crate) registry: TypeRegistry,
    pub(crate) cache: ObjectCache,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) manager: TransactionManager,
    pub(crate) config: Config,
    pub(crate) stats: DatabaseStats,
    open: AtomicBool,
}

/// The main database handle.
///
/// `Database` is the entry point for SnapDB. It owns the type registry,
/// the shared object cache and the storage backend, and hands out
/// snapshot-isolated [`Transaction`]s.
///
/// Handles are cheap to clone; every clone refers to the same database and
/// can be moved to other threads.
///
/// # Example
///
/// ```rust
/// use serde::{Deserialize, Serialize};
/// use snapdb_core::{Database, TransactOutcome, TypeDef};
///
/// #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// struct User { name: String }
///
/// let db = Database::open_in_memory().unwrap();
/// db.register_type::<User>(TypeDef::new("user").link("follows", "user")).unwrap();
///
/// let outcome = db
///     .transact(
///         |txn| {
///             txn.set("user", "alice", User { name: "Alice".into() })?;
///             txn.set("user", "bob", User { name: "Bob".into() })?;
///             txn.add_link("user", "follows", "alice", "bob")
///         },
///         None,
///     )
///     .unwrap();
/// assert!(outcome.is_committed());
///
/// assert_eq!(db.read_links_one("user", "follows", "alice").unwrap(), vec!["bob"]);
/// assert_eq!(db.find_slice("user", "follows", "bob", "", None).unwrap(), vec!["alice"]);
/// ```
#[derive(Clone)]
pub struct Database {
    inner: Arc<Shared>,
}

impl Database {
    /// Opens a database over `store`.
    ///
    /// Snapshot ids continue from the highest snapshot the store has
    /// committed.
    ///
    /// # Errors
    ///
    /// Currently infallible; kept fallible for backends that need to
    /// validate on open.
    pub fn open(store: Arc<dyn Store>, config: Config) -> CoreResult<Self> {
        let last = store.last_snapshot();
        tracing::info!(store = %store.describe(), last_snapshot = last, "opening database");

        Ok(Self {
            inner: Arc::new(Shared {
                registry: TypeRegistry::new(),
                cache: ObjectCache::new(),
                manager: TransactionManager::with_state(last),
                store,
                config,
                stats: DatabaseStats::new(),
                open: AtomicBool::new(true),
            }),
        })
    }

    /// Opens an empty in-memory database.
    ///
    /// # Errors
    ///
    /// See [`Database::open`].
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open(Arc::new(MemStore::new()), Config::default())
    }

    /// Opens or creates a persistent database backed by the log at `path`.
    ///
    /// # Errors
    ///
    /// Fails if the log cannot be opened or is corrupted.
    pub fn open_path(path: impl AsRef<Path>) -> CoreResult<Self> {
        let store = LogStore::open(path, LogStoreOptions::default())?;
        Self::open(Arc::new(store), Config::default())
    }

    /// Closes the database and its backend.
    ///
    /// New transactions are refused afterwards; transactions still open
    /// fail when they try to touch storage. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Fails if the backend cannot flush.
    pub fn close(&self) -> CoreResult<()> {
        if !self.inner.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::info!(
            store = %self.inner.store.describe(),
            active = self.inner.manager.active_count(),
            "closing database"
        );
        self.inner.store.close()?;
        Ok(())
    }

    /// Checks if the database is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CoreError::DatabaseClosed)
        }
    }

    /// Returns database configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Registers a serde-serializable record type.
    ///
    /// # Errors
    ///
    /// Fails if the name is already registered or the backend cannot
    /// allocate tags.
    pub fn register_type<T: Record>(&self, def: TypeDef) -> CoreResult<Arc<TypeInfo>> {
        self.register_type_with_codec(def, Arc::new(RecordCodec::<T>::new()))
    }

    /// Registers a type with an explicit codec.
    ///
    /// # Errors
    ///
    /// As for [`Database::register_type`].
    pub fn register_type_with_codec(
        &self,
        def: TypeDef,
        codec: Arc<dyn ObjectCodec>,
    ) -> CoreResult<Arc<TypeInfo>> {
        self.ensure_open()?;
        self.inner.registry.register(def, codec, self.inner.store.as_ref())
    }

    /// Returns the registered type names, sorted.
    #[must_use]
    pub fn type_names(&self) -> Vec<String> {
        self.inner.registry.names()
    }

    /// Begins a new transaction at the latest visible snapshot.
    ///
    /// # Errors
    ///
    /// Fails if the database is closed.
    pub fn begin(&self) -> CoreResult<Transaction> {
        self.ensure_open()?;
        Transaction::begin(Arc::clone(&self.inner))
    }

    /// Runs `f` in a transaction and commits it, retrying on conflicts.
    ///
    /// Each attempt gets a brand-new transaction. `f` may run any number
    /// of times and must not have effects outside the transaction.
    ///
    /// - If `f` returns an error the attempt is cancelled and the error
    ///   returned without retry.
    /// - If `f` cancels the transaction, [`TransactOutcome::Cancelled`].
    /// - If a commit aborts after `timeout` has elapsed,
    ///   [`TransactOutcome::TimedOut`]. `None` retries forever.
    ///
    /// # Errors
    ///
    /// Backend failures and programming errors (unknown types, type
    /// mismatches, misuse of the transaction) are returned as `Err`.
    pub fn transact<F>(&self, mut f: F, timeout: Option<Duration>) -> CoreResult<TransactOutcome>
    where
        F: FnMut(&mut Transaction) -> CoreResult<()>,
    {
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts = attempts.saturating_add(1);
            let mut txn = self.begin()?;

            if let Err(err) = f(&mut txn) {
                if txn.is_active() {
                    txn.cancel()?;
                }
                return Err(err);
            }

            let committed = match txn.state() {
                TransactionState::Active => txn.commit()?,
                TransactionState::Cancelled => return Ok(TransactOutcome::Cancelled),
                TransactionState::Finished => true,
                TransactionState::Aborted => false,
                state => {
                    return Err(CoreError::invalid_operation(format!(
                        "closure left transaction {} in state {state}",
                        txn.id()
                    )))
                }
            };

            if committed {
                let snapshot = txn.committed_snapshot().unwrap_or_else(|| txn.snapshot());
                return Ok(TransactOutcome::Committed(snapshot));
            }

            if let Some(limit) = timeout {
                if started.elapsed() >= limit {
                    tracing::debug!(attempts, ?limit, "transaction timed out");
                    return Ok(TransactOutcome::TimedOut { attempts });
                }
            }
            tracing::debug!(attempt = attempts, "transaction aborted by conflict, retrying");
        }
    }

    /// Like [`Database::transact`] with the configured default timeout.
    ///
    /// # Errors
    ///
    /// As for [`Database::transact`].
    pub fn transact_default<F>(&self, f: F) -> CoreResult<TransactOutcome>
    where
        F: FnMut(&mut Transaction) -> CoreResult<()>,
    {
        self.transact(f, self.inner.config.default_timeout)
    }

    /// Reads one object in its own transaction.
    ///
    /// # Errors
    ///
    /// As for [`Transaction::read`].
    pub fn read_one<T: Clone + 'static>(&self, type_name: &str, key: &str) -> CoreResult<Option<T>> {
        self.begin()?.read(type_name, key)
    }

    /// Checks existence in its own transaction.
    ///
    /// # Errors
    ///
    /// As for [`Transaction::exists`].
    pub fn exists_one(&self, type_name: &str, key: &str) -> CoreResult<bool> {
        self.begin()?.exists(type_name, key)
    }

    /// Reads a link set in its own transaction.
    ///
    /// # Errors
    ///
    /// As for [`Transaction::read_links`].
    pub fn read_links_one(&self, type_name: &str, link: &str, key: &str) -> CoreResult<Vec<String>> {
        self.begin()?.read_links(type_name, link, key)
    }

    /// Collects a slice of the reverse link index in its own transaction.
    ///
    /// # Errors
    ///
    /// As for [`Transaction::find_slice`].
    pub fn find_slice(
        &self,
        type_name: &str,
        link: &str,
        target: &str,
        from: &str,
        limit: Option<usize>,
    ) -> CoreResult<Vec<String>> {
        Ok(self.begin()?.find_slice(type_name, link, target, from, limit)?.all())
    }

    /// Reads the newest committed value of an object, bypassing snapshots
    /// and the cache.
    ///
    /// # Errors
    ///
    /// Fails on unknown types, type mismatches, and backend or decode
    /// failures.
    pub fn dirty_read<T: 'static>(&self, type_name: &str, key: &str) -> CoreResult<Option<T>> {
        let info = self.inner.registry.get(type_name)?;
        if info.codec().object_type() != TypeId::of::<T>() {
            return Err(CoreError::TypeMismatch {
                type_name: type_name.to_string(),
                stored: info.codec().rust_type(),
                requested: std::any::type_name::<T>(),
            });
        }

        let reference = ObjectRef::object(Arc::clone(&info), key);
        let bytes = self.latest(reference.cache_key())?.map(|v| v.bytes).unwrap_or_default();
        match info.codec().decode(&bytes)? {
            Some(object) => object.downcast::<T>().map(|b| Some(*b)).map_err(|_| {
                CoreError::invalid_operation(format!(
                    "decoded object is not a {}",
                    std::any::type_name::<T>()
                ))
            }),
            None => Ok(None),
        }
    }

    /// Checks whether an object currently exists, bypassing snapshots and
    /// the cache.
    ///
    /// # Errors
    ///
    /// Fails on unknown types or backend failures.
    pub fn dirty_exists(&self, type_name: &str, key: &str) -> CoreResult<bool> {
        let reference = ObjectRef::object(self.inner.registry.get(type_name)?, key);
        Ok(self
            .latest(reference.cache_key())?
            .is_some_and(|v| !v.is_tombstone()))
    }

    /// Reads the newest committed link set, bypassing snapshots and the
    /// cache.
    ///
    /// # Errors
    ///
    /// Fails on unknown types or links, and backend or decode failures.
    pub fn dirty_read_links(&self, type_name: &str, link: &str, key: &str) -> CoreResult<Vec<String>> {
        let reference = ObjectRef::link(self.inner.registry.get(type_name)?, link, key)?;
        let bytes = self.latest(reference.cache_key())?.map(|v| v.bytes).unwrap_or_default();
        Ok(decode_links(&bytes)?)
    }

    fn latest(&self, key: &CacheKey) -> CoreResult<Option<StoredValue>> {
        self.ensure_open()?;
        let context = self
            .inner
            .store
            .new_context(self.inner.manager.visible().as_u64())?;
        let value = context.get_latest(key.as_bytes())?;
        context.rollback();
        Ok(value)
    }

    /// Returns a fresh random key: 32 lowercase hex characters.
    #[must_use]
    pub fn random_key() -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }

    /// Returns the newest snapshot new transactions will read at.
    #[must_use]
    pub fn snapshot_id(&self) -> SnapshotId {
        self.inner.manager.visible()
    }

    /// Returns the number of transactions currently open.
    #[must_use]
    pub fn active_transactions(&self) -> usize {
        self.inner.manager.active_count()
    }

    /// Returns the number of cached object handles.
    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.inner.cache.len()
    }

    /// Returns the reference count of a cached object, if it is cached.
    ///
    /// # Errors
    ///
    /// Fails on unknown types.
    pub fn cache_refcount(&self, type_name: &str, key: &str) -> CoreResult<Option<usize>> {
        let reference = ObjectRef::object(self.inner.registry.get(type_name)?, key);
        Ok(self.inner.cache.refcount(reference.cache_key()))
    }

    /// Drops cache entries no transaction references. Returns how many.
    ///
    /// Entries are evicted as soon as their last transaction ends, so a
    /// non-zero result points at a leaked reference.
    pub fn sweep(&self) -> usize {
        self.inner.cache.sweep()
    }

    /// Drops stored versions no open transaction can read any more.
    ///
    /// Returns the number of versions removed.
    ///
    /// # Errors
    ///
    /// Fails if the database is closed.
    pub fn compact(&self) -> CoreResult<usize> {
        self.ensure_open()?;
        let horizon = self.inner.manager.horizon();
        let removed = self.inner.store.compact(horizon.as_u64());
        tracing::debug!(horizon = %horizon, removed, "compacted store");
        Ok(removed)
    }

    /// Returns a point-in-time copy of the statistics counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("store", &self.inner.store.describe())
            .field("open", &self.is_open())
            .field("snapshot", &self.snapshot_id())
            .field("types", &self.type_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use snapdb_codec::StringCodec;
    use snapdb_storage::{
        ResultSet, StorageError, StorageResult, StoreContext, TypeDescriptor, TypeTags,
    };
    use std::io;
    use std::sync::Barrier;
    use std::thread;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        text: String,
    }

    fn note(text: &str) -> Note {
        Note { text: text.into() }
    }

    fn create_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.register_type::<Note>(TypeDef::new("note").link("refs", "note"))
            .unwrap();
        db
    }

    #[test]
    fn open_in_memory() {
        let db = create_db();
        assert!(db.is_open());
        assert_eq!(db.snapshot_id(), SnapshotId::new(0));
        assert_eq!(db.type_names(), vec!["note"]);
    }

    #[test]
    fn set_then_read() {
        let db = create_db();
        let mut txn = db.begin().unwrap();
        txn.set("note", "a", note("hello")).unwrap();
        assert_eq!(txn.read::<Note>("note", "a").unwrap(), Some(note("hello")));
        assert!(txn.commit().unwrap());

        assert_eq!(db.read_one::<Note>("note", "a").unwrap(), Some(note("hello")));
        assert!(db.exists_one("note", "a").unwrap());
        assert!(!db.exists_one("note", "b").unwrap());
        assert_eq!(db.snapshot_id(), SnapshotId::new(1));
    }

    #[test]
    fn uncommitted_writes_are_private() {
        let db = create_db();
        let mut txn = db.begin().unwrap();
        txn.set("note", "a", note("draft")).unwrap();

        assert_eq!(db.read_one::<Note>("note", "a").unwrap(), None);
        assert!(!db.dirty_exists("note", "a").unwrap());

        drop(txn);
        assert_eq!(db.read_one::<Note>("note", "a").unwrap(), None);
    }

    #[test]
    fn write_in_place() {
        let db = create_db();
        db.transact(|txn| txn.set("note", "a", note("v1")), None)
            .unwrap();

        let mut txn = db.begin().unwrap();
        txn.write::<Note>("note", "a").unwrap().unwrap().text.push_str("+edit");
        assert!(txn.commit().unwrap());

        assert_eq!(db.dirty_read::<Note>("note", "a").unwrap(), Some(note("v1+edit")));
    }

    #[test]
    fn write_absent_returns_none() {
        let db = create_db();
        let mut txn = db.begin().unwrap();
        assert!(txn.write::<Note>("note", "missing").unwrap().is_none());
    }

    #[test]
    fn delete_object() {
        let db = create_db();
        db.transact(|txn| txn.set("note", "a", note("x")), None)
            .unwrap();
        db.transact(|txn| txn.delete("note", "a"), None).unwrap();

        assert!(!db.exists_one("note", "a").unwrap());
        assert_eq!(db.dirty_read::<Note>("note", "a").unwrap(), None);
    }

    #[test]
    fn type_mismatch_is_error() {
        let db = create_db();
        let mut txn = db.begin().unwrap();
        assert!(matches!(
            txn.read::<String>("note", "a"),
            Err(CoreError::TypeMismatch { .. })
        ));
        assert!(matches!(
            txn.set("note", "a", 5u32),
            Err(CoreError::TypeMismatch { .. })
        ));
        assert!(txn.is_active());
    }

    #[test]
    fn unknown_type_and_link() {
        let db = create_db();
        let mut txn = db.begin().unwrap();
        assert!(matches!(
            txn.exists("ghost", "a"),
            Err(CoreError::UnknownType { .. })
        ));
        assert!(matches!(
            txn.read_links("note", "ghost", "a"),
            Err(CoreError::UnknownLink { .. })
        ));
    }

    #[test]
    fn duplicate_registration_rejected() {
        let db = create_db();
        assert!(matches!(
            db.register_type::<Note>(TypeDef::new("note")),
            Err(CoreError::DuplicateType { .. })
        ));
    }

    #[test]
    fn custom_codec() {
        let db = Database::open_in_memory().unwrap();
        db.register_type_with_codec(TypeDef::new("text"), Arc::new(StringCodec))
            .unwrap();

        db.transact(|txn| txn.set("text", "k", String::from("raw")), None)
            .unwrap();
        assert_eq!(db.read_one::<String>("text", "k").unwrap(), Some("raw".into()));
    }

    #[test]
    fn links_and_reverse_index() {
        let db = create_db();
        db.transact(
            |txn| {
                txn.set_links("note", "refs", "a", ["x", "y"])?;
                txn.add_link("note", "refs", "b", "x")
            },
            None,
        )
        .unwrap();

        assert_eq!(db.read_links_one("note", "refs", "a").unwrap(), vec!["x", "y"]);
        assert_eq!(db.find_slice("note", "refs", "x", "", None).unwrap(), vec!["a", "b"]);
        assert_eq!(db.find_slice("note", "refs", "x", "a", None).unwrap(), vec!["b"]);
        assert_eq!(db.find_slice("note", "refs", "y", "", Some(1)).unwrap(), vec!["a"]);

        db.transact(|txn| txn.remove_link("note", "refs", "a", "x"), None)
            .unwrap();
        assert_eq!(db.find_slice("note", "refs", "x", "", None).unwrap(), vec!["b"]);
        assert_eq!(db.dirty_read_links("note", "refs", "a").unwrap(), vec!["y"]);
    }

    #[test]
    fn has_link_sees_pending_changes() {
        let db = create_db();
        let mut txn = db.begin().unwrap();
        txn.add_link("note", "refs", "a", "x").unwrap();
        assert!(txn.has_link("note", "refs", "a", "x").unwrap());
        txn.set_links("note", "refs", "a", ["y"]).unwrap();
        assert!(!txn.has_link("note", "refs", "a", "x").unwrap());
        assert!(txn.has_link("note", "refs", "a", "y").unwrap());
    }

    #[test]
    fn overlapping_set_links_keeps_shared_targets() {
        let db = create_db();
        db.transact(|txn| txn.set_links("note", "refs", "a", ["x", "y"]), None)
            .unwrap();

        db.transact(
            |txn| {
                txn.set_links("note", "refs", "a", ["y", "z"])?;
                assert!(txn.has_link("note", "refs", "a", "y")?);
                assert!(txn.has_link("note", "refs", "a", "z")?);
                assert!(!txn.has_link("note", "refs", "a", "x")?);
                Ok(())
            },
            None,
        )
        .unwrap();

        assert_eq!(db.read_links_one("note", "refs", "a").unwrap(), vec!["y", "z"]);
        for (target, expected) in [("x", vec![]), ("y", vec!["a"]), ("z", vec!["a"])] {
            assert_eq!(
                db.find_slice("note", "refs", target, "", None).unwrap(),
                expected,
                "reverse index for {target}"
            );
        }
    }

    #[test]
    fn list_slice_skips_deleted() {
        let db = create_db();
        db.transact(
            |txn| {
                for key in ["c", "a", "b"] {
                    txn.set("note", key, note(key))?;
                }
                Ok(())
            },
            None,
        )
        .unwrap();
        db.transact(|txn| txn.delete("note", "b"), None).unwrap();

        let txn = db.begin().unwrap();
        assert_eq!(txn.list_slice("note", "", None).unwrap().all(), vec!["a", "c"]);
        assert_eq!(txn.list_slice("note", "a", Some(1)).unwrap().all(), vec!["c"]);
    }

    #[test]
    fn cancel_discards_changes() {
        let db = create_db();
        let mut txn = db.begin().unwrap();
        txn.set("note", "a", note("x")).unwrap();
        txn.cancel().unwrap();

        assert_eq!(txn.state(), TransactionState::Cancelled);
        assert!(!txn.commit().unwrap());
        assert!(matches!(txn.cancel(), Err(CoreError::InvalidOperation { .. })));
        assert!(matches!(txn.exists("note", "a"), Err(CoreError::InvalidOperation { .. })));
        assert!(!db.exists_one("note", "a").unwrap());
        assert_eq!(db.cache_len(), 0);
    }

    #[test]
    fn commit_twice_is_invalid() {
        let db = create_db();
        let mut txn = db.begin().unwrap();
        txn.set("note", "a", note("x")).unwrap();
        assert!(txn.commit().unwrap());
        assert!(matches!(txn.commit(), Err(CoreError::InvalidOperation { .. })));
    }

    #[test]
    fn read_only_commit_keeps_snapshot() {
        let db = create_db();
        db.transact(|txn| txn.set("note", "a", note("x")), None)
            .unwrap();

        let mut txn = db.begin().unwrap();
        txn.exists("note", "a").unwrap();
        assert!(txn.commit().unwrap());
        assert_eq!(txn.committed_snapshot(), Some(SnapshotId::new(1)));
        assert_eq!(db.snapshot_id(), SnapshotId::new(1));
    }

    #[test]
    fn closure_error_cancels_without_retry() {
        let db = create_db();
        let mut runs = 0;
        let result = db.transact(
            |txn| {
                runs += 1;
                txn.set("note", "a", note("x"))?;
                Err(CoreError::invalid_operation("stop"))
            },
            None,
        );
        assert!(matches!(result, Err(CoreError::InvalidOperation { .. })));
        assert_eq!(runs, 1);
        assert!(!db.exists_one("note", "a").unwrap());
    }

    #[test]
    fn closure_cancel_is_outcome() {
        let db = create_db();
        let outcome = db
            .transact(
                |txn| {
                    txn.set("note", "a", note("x"))?;
                    txn.cancel()
                },
                None,
            )
            .unwrap();
        assert_eq!(outcome, TransactOutcome::Cancelled);
        assert_eq!(db.stats().transactions_cancelled, 1);
    }

    #[test]
    fn transact_default_uses_config() {
        let db = create_db();
        let outcome = db
            .transact_default(|txn| txn.set("note", "a", note("x")))
            .unwrap();
        assert_eq!(outcome, TransactOutcome::Committed(SnapshotId::new(1)));
    }

    #[test]
    fn conflicting_commit_aborts() {
        let db = create_db();
        db.transact(|txn| txn.set("note", "a", note("base")), None)
            .unwrap();

        let mut first = db.begin().unwrap();
        let mut second = db.begin().unwrap();
        first.write::<Note>("note", "a").unwrap().unwrap().text = "first".into();
        second.write::<Note>("note", "a").unwrap().unwrap().text = "second".into();

        assert!(first.commit().unwrap());
        assert!(!second.commit().unwrap());
        assert_eq!(second.state(), TransactionState::Aborted);
        assert_eq!(db.read_one::<Note>("note", "a").unwrap(), Some(note("first")));

        let stats = db.stats();
        assert_eq!(stats.transactions_aborted, 1);
    }

    #[test]
    fn stale_read_set_aborts() {
        let db = create_db();
        db.transact(|txn| txn.set("note", "a", note("base")), None)
            .unwrap();

        let mut reader = db.begin().unwrap();
        reader.read::<Note>("note", "a").unwrap();
        reader.set("note", "b", note("derived")).unwrap();

        db.transact(|txn| txn.set("note", "a", note("changed")), None)
            .unwrap();
        assert!(!reader.commit().unwrap());
        assert!(!db.exists_one("note", "b").unwrap());
    }

    #[test]
    fn cache_empties_after_transactions() {
        let db = create_db();
        let mut txn = db.begin().unwrap();
        txn.set("note", "a", note("x")).unwrap();
        txn.add_link("note", "refs", "a", "b").unwrap();
        assert_eq!(db.cache_len(), 2);
        assert_eq!(db.cache_refcount("note", "a").unwrap(), Some(1));

        let mut other = db.begin().unwrap();
        other.exists("note", "a").unwrap();
        assert_eq!(db.cache_refcount("note", "a").unwrap(), Some(2));

        assert!(txn.commit().unwrap());
        assert_eq!(db.cache_refcount("note", "a").unwrap(), Some(1));
        drop(other);

        assert_eq!(db.cache_len(), 0);
        assert_eq!(db.sweep(), 0);
    }

    #[test]
    fn compact_keeps_versions_open_transactions_need() {
        let db = create_db();
        db.transact(|txn| txn.set("note", "a", note("v1")), None)
            .unwrap();

        let mut old = db.begin().unwrap();
        db.transact(|txn| txn.set("note", "a", note("v2")), None)
            .unwrap();
        db.transact(|txn| txn.set("note", "a", note("v3")), None)
            .unwrap();

        db.compact().unwrap();
        assert_eq!(old.read::<Note>("note", "a").unwrap(), Some(note("v1")));
        drop(old);

        assert!(db.compact().unwrap() > 0);
        assert_eq!(db.read_one::<Note>("note", "a").unwrap(), Some(note("v3")));
    }

    #[test]
    fn random_keys_are_hex() {
        let a = Database::random_key();
        let b = Database::random_key();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn closed_database_refuses_work() {
        let db = create_db();
        db.close().unwrap();
        assert!(!db.is_open());
        assert!(matches!(db.begin(), Err(CoreError::DatabaseClosed)));
        assert!(matches!(db.compact(), Err(CoreError::DatabaseClosed)));
        assert!(db.close().is_ok());
    }

    #[test]
    fn stats_count_commits() {
        let db = create_db();
        db.transact(
            |txn| {
                txn.set("note", "a", note("x"))?;
                txn.set("note", "b", note("y"))
            },
            None,
        )
        .unwrap();
        let stats = db.stats();
        assert_eq!(stats.transactions_started, 1);
        assert_eq!(stats.transactions_committed, 1);
        assert_eq!(stats.versions_written, 2);
    }

    /// Delegates to a [`MemStore`] but fails storage commits on demand.
    struct FlakyStore {
        inner: MemStore,
        fail_commits: Arc<AtomicBool>,
    }

    struct FlakyContext {
        inner: Box<dyn StoreContext>,
        fail_commits: Arc<AtomicBool>,
    }

    impl Store for FlakyStore {
        fn register_type(&self, descriptor: &TypeDescriptor) -> StorageResult<TypeTags> {
            self.inner.register_type(descriptor)
        }

        fn new_context(&self, snapshot: u64) -> StorageResult<Box<dyn StoreContext>> {
            Ok(Box::new(FlakyContext {
                inner: self.inner.new_context(snapshot)?,
                fail_commits: Arc::clone(&self.fail_commits),
            }))
        }

        fn last_snapshot(&self) -> u64 {
            self.inner.last_snapshot()
        }

        fn compact(&self, horizon: u64) -> usize {
            self.inner.compact(horizon)
        }

        fn describe(&self) -> String {
            format!("flaky {}", self.inner.describe())
        }

        fn close(&self) -> StorageResult<()> {
            self.inner.close()
        }
    }

    impl StoreContext for FlakyContext {
        fn snapshot(&self) -> u64 {
            self.inner.snapshot()
        }

        fn get(&self, key: &[u8]) -> StorageResult<Option<StoredValue>> {
            self.inner.get(key)
        }

        fn get_latest(&self, key: &[u8]) -> StorageResult<Option<StoredValue>> {
            self.inner.get_latest(key)
        }

        fn store(&mut self, key: &[u8], value: &[u8]) {
            self.inner.store(key, value);
        }

        fn add_index(&mut self, target: &[u8], source: &str) {
            self.inner.add_index(target, source);
        }

        fn remove_index(&mut self, target: &[u8], source: &str) {
            self.inner.remove_index(target, source);
        }

        fn find_slice(&self, target: &[u8], from: &str, limit: Option<usize>) -> StorageResult<ResultSet> {
            self.inner.find_slice(target, from, limit)
        }

        fn list_slice(&self, prefix: &[u8], from: &str, limit: Option<usize>) -> StorageResult<ResultSet> {
            self.inner.list_slice(prefix, from, limit)
        }

        fn pending(&self) -> usize {
            self.inner.pending()
        }

        fn commit(self: Box<Self>, snapshot: u64) -> StorageResult<()> {
            if self.fail_commits.load(Ordering::Acquire) {
                self.inner.rollback();
                return Err(StorageError::Io(io::Error::other("disk full")));
            }
            self.inner.commit(snapshot)
        }

        fn rollback(self: Box<Self>) {
            self.inner.rollback();
        }
    }

    #[test]
    fn closed_store_fails_commit_with_error_state() {
        let store = MemStore::new();
        let db = Database::open(Arc::new(store.clone()), Config::default()).unwrap();
        db.register_type::<Note>(TypeDef::new("note")).unwrap();

        let mut txn = db.begin().unwrap();
        txn.set("note", "a", note("x")).unwrap();
        store.close().unwrap();

        assert!(matches!(
            txn.commit(),
            Err(CoreError::Storage(StorageError::Closed))
        ));
        assert_eq!(txn.state(), TransactionState::Error);
        assert_eq!(db.cache_len(), 0);
        assert_eq!(db.active_transactions(), 0);
        assert_eq!(db.stats().errors, 1);
        assert!(txn.commit().is_err());
    }

    #[test]
    fn failed_storage_commit_still_publishes_snapshot() {
        let fail_commits = Arc::new(AtomicBool::new(false));
        let store = FlakyStore {
            inner: MemStore::new(),
            fail_commits: Arc::clone(&fail_commits),
        };
        let db = Database::open(Arc::new(store), Config::default()).unwrap();
        db.register_type::<Note>(TypeDef::new("note")).unwrap();
        db.transact(|txn| txn.set("note", "a", note("x")), None)
            .unwrap();
        assert_eq!(db.snapshot_id(), SnapshotId::new(1));

        fail_commits.store(true, Ordering::Release);
        let mut txn = db.begin().unwrap();
        txn.write::<Note>("note", "a").unwrap().unwrap().text = "y".into();
        assert!(matches!(
            txn.commit(),
            Err(CoreError::Storage(StorageError::Io(_)))
        ));
        assert_eq!(txn.state(), TransactionState::Error);
        assert_eq!(db.snapshot_id(), SnapshotId::new(2));
        assert_eq!(db.cache_len(), 0);

        // Nothing of the failed batch reached storage or the cache.
        fail_commits.store(false, Ordering::Release);
        assert_eq!(db.read_one::<Note>("note", "a").unwrap(), Some(note("x")));
        db.transact(|txn| txn.set("note", "b", note("z")), None)
            .unwrap();
        assert_eq!(db.snapshot_id(), SnapshotId::new(3));
    }

    #[test]
    fn contended_commit_backs_off_without_rerunning_closure() {
        let db = create_db();
        db.transact(|txn| txn.set("note", "a", note("x")), None)
            .unwrap();

        let reference = ObjectRef::object(db.inner.registry.get("note").unwrap(), "a");
        let context = db.inner.store.new_context(0).unwrap();
        let handle = db.inner.cache.acquire(&reference, &*context, false).unwrap();
        context.rollback();

        let barrier = Barrier::new(2);
        let mut runs = 0;
        let outcome = thread::scope(|scope| {
            scope.spawn(|| {
                let _guard = handle.lock().try_lock().expect("object lock is free");
                barrier.wait();
                thread::sleep(Duration::from_millis(30));
            });
            barrier.wait();
            db.transact(
                |txn| {
                    runs += 1;
                    if let Some(n) = txn.write::<Note>("note", "a")? {
                        n.text = "y".into();
                    }
                    Ok(())
                },
                None,
            )
            .unwrap()
        });

        assert!(outcome.is_committed());
        assert_eq!(runs, 1);
        assert!(db.stats().contention_retries > 0);
        assert_eq!(db.read_one::<Note>("note", "a").unwrap(), Some(note("y")));

        db.inner.cache.release([&handle]);
        assert_eq!(db.cache_len(), 0);
    }

    #[test]
    fn transaction_tracks_touched_and_dirty_objects() {
        let db = create_db();
        db.transact(|txn| txn.set("note", "a", note("x")), None)
            .unwrap();

        let mut txn = db.begin().unwrap();
        assert_eq!((txn.touched(), txn.dirty_count()), (0, 0));
        txn.read::<Note>("note", "a").unwrap();
        assert_eq!((txn.touched(), txn.dirty_count()), (1, 0));
        txn.set("note", "b", note("y")).unwrap();
        txn.add_link("note", "refs", "b", "a").unwrap();
        assert_eq!((txn.touched(), txn.dirty_count()), (3, 2));
        txn.write::<Note>("note", "a").unwrap();
        assert_eq!((txn.touched(), txn.dirty_count()), (3, 3));
    }
}
