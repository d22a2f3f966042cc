//! Optimistic snapshot transactions.

use crate::cache::ObjectCache;
use crate::database::Shared;
use crate::error::{CoreError, CoreResult};
use crate::object::{CacheKey, LinkSet, ObjectHandle, ObjectRef};
use crate::transaction::backoff::Backoff;
use crate::transaction::state::{LiveObject, LiveVersion, TransactionState};
use crate::types::{SnapshotId, TransactionId};
use snapdb_codec::{decode_links, encode_links};
use snapdb_storage::{ResultSet, StoreContext};
use std::any::{Any, TypeId};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// How one commit attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    /// Another transaction held one of our object locks.
    Contended,
    /// An object changed after our snapshot.
    Conflict,
    /// Everything was written.
    Committed {
        snapshot: SnapshotId,
        versions: usize,
    },
}

/// A snapshot-isolated unit of work.
///
/// A transaction reads every object as of the snapshot it started at and
/// keeps a private decoded copy of everything it touches. Nothing it does
/// is visible to others until [`Transaction::commit`] succeeds; commit
/// fails with an aborted state if any touched object was committed by
/// someone else after the snapshot.
///
/// Dropping an uncommitted transaction discards it.
///
/// # Example
///
/// ```rust
/// use serde::{Deserialize, Serialize};
/// use snapdb_core::{Database, TypeDef};
///
/// #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// struct Counter { value: u64 }
///
/// let db = Database::open_in_memory().unwrap();
/// db.register_type::<Counter>(TypeDef::new("counter")).unwrap();
///
/// let mut txn = db.begin().unwrap();
/// txn.set("counter", "hits", Counter { value: 1 }).unwrap();
/// assert!(txn.commit().unwrap());
///
/// let mut txn = db.begin().unwrap();
/// if let Some(counter) = txn.write::<Counter>("counter", "hits").unwrap() {
///     counter.value += 1;
/// }
/// assert!(txn.commit().unwrap());
///
/// assert_eq!(db.read_one::<Counter>("counter", "hits").unwrap(), Some(Counter { value: 2 }));
/// ```
pub struct Transaction {
    id: TransactionId,
    snapshot: SnapshotId,
    state: TransactionState,
    shared: Arc<Shared>,
    /// Reads as of `snapshot`; taken when the transaction ends.
    context: Option<Box<dyn StoreContext>>,
    live: HashMap<CacheKey, LiveVersion>,
    committed_at: Option<SnapshotId>,
    released: bool,
}

impl Transaction {
    pub(crate) fn begin(shared: Arc<Shared>) -> CoreResult<Self> {
        let (id, snapshot) = shared.manager.begin();
        let context = match shared.store.new_context(snapshot.as_u64()) {
            Ok(context) => context,
            Err(err) => {
                shared.manager.end(snapshot);
                return Err(err.into());
            }
        };
        shared.stats.record_transaction_start();
        tracing::trace!(txn = %id, snapshot = %snapshot, "began transaction");

        Ok(Self {
            id,
            snapshot,
            state: TransactionState::Active,
            shared,
            context: Some(context),
            live: HashMap::new(),
            committed_at: None,
            released: false,
        })
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the snapshot reads are bound to.
    #[must_use]
    pub fn snapshot(&self) -> SnapshotId {
        self.snapshot
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Checks if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Returns the snapshot this transaction committed at.
    ///
    /// Read-only transactions report their own snapshot.
    #[must_use]
    pub fn committed_snapshot(&self) -> Option<SnapshotId> {
        self.committed_at
    }

    /// Returns the number of objects and link sets touched so far.
    #[must_use]
    pub fn touched(&self) -> usize {
        self.live.len()
    }

    /// Returns the number of touched objects with pending changes.
    #[must_use]
    pub fn dirty_count(&self) -> usize {
        self.live.values().filter(|l| l.dirty).count()
    }

    /// Returns true if the object exists.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is not active, the type is unknown, or the
    /// stored value cannot be decoded.
    pub fn exists(&mut self, type_name: &str, key: &str) -> CoreResult<bool> {
        let reference = self.object_ref(type_name, key)?;
        let live = self.live_version(reference, false, true)?;
        Ok(matches!(live.object, LiveObject::Record(Some(_))))
    }

    /// Returns a copy of the object, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is not active, the type is unknown, `T` is
    /// not the registered Rust type, or the stored value cannot be decoded.
    pub fn read<T: Clone + 'static>(&mut self, type_name: &str, key: &str) -> CoreResult<Option<T>> {
        let reference = self.typed_ref::<T>(type_name, key)?;
        let live = self.live_version(reference, false, true)?;
        match &live.object {
            LiveObject::Record(Some(object)) => downcast_ref::<T>(&**object).cloned().map(Some),
            LiveObject::Record(None) => Ok(None),
            LiveObject::Links(_) => Err(not_a_record()),
        }
    }

    /// Returns the transaction's copy of the object for in-place changes.
    ///
    /// The object is marked for writing even if it does not exist, in which
    /// case `None` is returned.
    ///
    /// # Errors
    ///
    /// As for [`Transaction::read`].
    pub fn write<T: 'static>(&mut self, type_name: &str, key: &str) -> CoreResult<Option<&mut T>> {
        let reference = self.typed_ref::<T>(type_name, key)?;
        let live = self.live_version(reference, true, true)?;
        match &mut live.object {
            LiveObject::Record(Some(object)) => object
                .downcast_mut::<T>()
                .map(Some)
                .ok_or_else(|| unexpected_type::<T>()),
            LiveObject::Record(None) => Ok(None),
            LiveObject::Links(_) => Err(not_a_record()),
        }
    }

    /// Replaces the object.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is not active, the type is unknown, or `T`
    /// is not the registered Rust type.
    pub fn set<T: Send + 'static>(&mut self, type_name: &str, key: &str, value: T) -> CoreResult<()> {
        let reference = self.typed_ref::<T>(type_name, key)?;
        let live = self.live_version(reference, true, false)?;
        live.object = LiveObject::Record(Some(Box::new(value)));
        Ok(())
    }

    /// Deletes the object.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is not active or the type is unknown.
    pub fn delete(&mut self, type_name: &str, key: &str) -> CoreResult<()> {
        let reference = self.object_ref(type_name, key)?;
        let live = self.live_version(reference, true, false)?;
        live.object = LiveObject::Record(None);
        Ok(())
    }

    /// Returns the keys linked from `key` through `link`, sorted.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is not active, the type or link is unknown,
    /// or the stored list cannot be decoded.
    pub fn read_links(&mut self, type_name: &str, link: &str, key: &str) -> CoreResult<Vec<String>> {
        Ok(self.links(type_name, link, key, false)?.effective_keys())
    }

    /// Returns true if `key` links to `target` through `link`.
    ///
    /// # Errors
    ///
    /// As for [`Transaction::read_links`].
    pub fn has_link(&mut self, type_name: &str, link: &str, key: &str, target: &str) -> CoreResult<bool> {
        Ok(self.links(type_name, link, key, false)?.has(target))
    }

    /// Links `key` to `target`.
    ///
    /// # Errors
    ///
    /// As for [`Transaction::read_links`].
    pub fn add_link(&mut self, type_name: &str, link: &str, key: &str, target: &str) -> CoreResult<()> {
        self.links(type_name, link, key, true)?.add(target);
        Ok(())
    }

    /// Unlinks `key` from `target`.
    ///
    /// # Errors
    ///
    /// As for [`Transaction::read_links`].
    pub fn remove_link(&mut self, type_name: &str, link: &str, key: &str, target: &str) -> CoreResult<()> {
        self.links(type_name, link, key, true)?.remove(target);
        Ok(())
    }

    /// Replaces every target of `link` on `key`.
    ///
    /// # Errors
    ///
    /// As for [`Transaction::read_links`].
    pub fn set_links<I, S>(&mut self, type_name: &str, link: &str, key: &str, targets: I) -> CoreResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let targets = targets.into_iter().map(Into::into).collect();
        self.links(type_name, link, key, true)?.set(targets);
        Ok(())
    }

    /// Lists the keys whose `link` points at `target`.
    ///
    /// The scan reads committed data as of this transaction's snapshot and
    /// does not see this transaction's own uncommitted link changes.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is not active, the type or link is unknown,
    /// or the backend fails.
    pub fn find(&self, type_name: &str, link: &str, target: &str) -> CoreResult<ResultSet> {
        self.find_slice(type_name, link, target, "", None)
    }

    /// Like [`Transaction::find`], starting strictly after `from` and
    /// returning at most `limit` keys.
    ///
    /// # Errors
    ///
    /// As for [`Transaction::find`].
    pub fn find_slice(
        &self,
        type_name: &str,
        link: &str,
        target: &str,
        from: &str,
        limit: Option<usize>,
    ) -> CoreResult<ResultSet> {
        self.ensure_active()?;
        let target = ObjectRef::link(self.shared.registry.get(type_name)?, link, target)?;
        let context = self.context()?;
        Ok(context.find_slice(target.cache_key().as_bytes(), from, limit)?)
    }

    /// Lists keys of existing objects of a type, in key order, strictly
    /// after `from` and at most `limit` of them.
    ///
    /// Like [`Transaction::find`], this reads committed data only.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is not active, the type is unknown, or the
    /// backend fails.
    pub fn list_slice(&self, type_name: &str, from: &str, limit: Option<usize>) -> CoreResult<ResultSet> {
        self.ensure_active()?;
        let info = self.shared.registry.get(type_name)?;
        let prefix = CacheKey::prefix(info.tag(), 0);
        Ok(self.context()?.list_slice(&prefix, from, limit)?)
    }

    /// Abandons the transaction. Nothing it changed is written.
    ///
    /// # Errors
    ///
    /// Fails if the transaction is not active.
    pub fn cancel(&mut self) -> CoreResult<()> {
        self.ensure_active()?;
        self.state = TransactionState::Cancelled;
        self.shared.stats.record_transaction_cancel();
        tracing::debug!(txn = %self.id, "cancelled transaction");
        self.release();
        Ok(())
    }

    /// Commits the transaction.
    ///
    /// Returns `Ok(true)` if it committed, and `Ok(false)` if it was
    /// cancelled or aborted by a conflicting commit. While another commit
    /// holds one of the touched objects this call backs off and retries.
    ///
    /// # Errors
    ///
    /// A backend or encoding failure moves the transaction to the error
    /// state and is returned. Committing a transaction that already
    /// finished, aborted or failed is an invalid operation.
    pub fn commit(&mut self) -> CoreResult<bool> {
        match self.state {
            TransactionState::Active => {}
            TransactionState::Cancelled => return Ok(false),
            state => {
                return Err(CoreError::invalid_operation(format!(
                    "cannot commit transaction {} in state {state}",
                    self.id
                )))
            }
        }

        self.state = TransactionState::Committing;
        let mut backoff = Backoff::new(&self.shared.config);

        loop {
            match self.try_commit() {
                Ok(Attempt::Contended) => {
                    self.shared.stats.record_contention();
                    tracing::trace!(txn = %self.id, "commit contended, backing off");
                    backoff.wait();
                }
                Ok(Attempt::Conflict) => {
                    self.state = TransactionState::Aborted;
                    self.shared.stats.record_transaction_abort();
                    self.release();
                    return Ok(false);
                }
                Ok(Attempt::Committed { snapshot, versions }) => {
                    self.state = TransactionState::Finished;
                    self.committed_at = Some(snapshot);
                    self.shared.stats.record_transaction_commit(versions as u64);
                    tracing::debug!(txn = %self.id, snapshot = %snapshot, versions, "committed transaction");
                    self.release();
                    return Ok(true);
                }
                Err(err) => {
                    self.state = TransactionState::Error;
                    self.shared.stats.record_error();
                    tracing::warn!(txn = %self.id, error = %err, "commit failed");
                    self.release();
                    return Err(err);
                }
            }
        }
    }

    fn try_commit(&mut self) -> CoreResult<Attempt> {
        let handles: Vec<Arc<ObjectHandle>> =
            self.live.values().map(|l| Arc::clone(&l.handle)).collect();

        let mut guards = Vec::with_capacity(handles.len());
        for handle in &handles {
            match handle.lock().try_lock() {
                Some(guard) => guards.push(guard),
                None => return Ok(Attempt::Contended),
            }
        }

        // Blind writes never loaded their object; they still need a head to
        // validate against.
        let context = self.context()?;
        for handle in &handles {
            if !handle.is_loaded() {
                ObjectCache::load(handle, context)?;
            }
        }

        for handle in &handles {
            if let Some(head) = handle.head_snapshot() {
                if head > self.snapshot {
                    tracing::debug!(
                        txn = %self.id,
                        object = %handle.reference(),
                        head = %head,
                        snapshot = %self.snapshot,
                        "write conflict"
                    );
                    return Ok(Attempt::Conflict);
                }
            }
        }

        let dirty: Vec<&LiveVersion> = self.live.values().filter(|l| l.dirty).collect();
        if dirty.is_empty() {
            return Ok(Attempt::Committed {
                snapshot: self.snapshot,
                versions: 0,
            });
        }

        let snapshot = self.shared.manager.allocate();
        let result = write_versions(&self.shared, &dirty, snapshot);
        self.shared.manager.publish(snapshot);
        result?;

        Ok(Attempt::Committed {
            snapshot,
            versions: dirty.len(),
        })
    }

    fn ensure_active(&self) -> CoreResult<()> {
        if self.state == TransactionState::Active {
            Ok(())
        } else {
            Err(CoreError::invalid_operation(format!(
                "transaction {} is {}",
                self.id, self.state
            )))
        }
    }

    fn context(&self) -> CoreResult<&dyn StoreContext> {
        self.context
            .as_deref()
            .ok_or_else(|| CoreError::invalid_operation(format!("transaction {} has ended", self.id)))
    }

    fn object_ref(&self, type_name: &str, key: &str) -> CoreResult<ObjectRef> {
        Ok(ObjectRef::object(self.shared.registry.get(type_name)?, key))
    }

    fn typed_ref<T: 'static>(&self, type_name: &str, key: &str) -> CoreResult<ObjectRef> {
        let info = self.shared.registry.get(type_name)?;
        if info.codec().object_type() != TypeId::of::<T>() {
            return Err(CoreError::TypeMismatch {
                type_name: type_name.to_string(),
                stored: info.codec().rust_type(),
                requested: std::any::type_name::<T>(),
            });
        }
        Ok(ObjectRef::object(info, key))
    }

    fn links(&mut self, type_name: &str, link: &str, key: &str, for_write: bool) -> CoreResult<&mut LinkSet> {
        let reference = ObjectRef::link(self.shared.registry.get(type_name)?, link, key)?;
        let live = self.live_version(reference, for_write, true)?;
        match &mut live.object {
            LiveObject::Links(links) => Ok(links),
            LiveObject::Record(_) => Err(CoreError::invalid_operation("reference is not a link set")),
        }
    }

    /// Returns this transaction's working copy of `reference`, creating it
    /// on first touch.
    fn live_version(&mut self, reference: ObjectRef, for_write: bool, load: bool) -> CoreResult<&mut LiveVersion> {
        self.ensure_active()?;
        let context = self
            .context
            .as_deref()
            .ok_or_else(|| CoreError::invalid_operation("transaction has ended"))?;

        match self.live.entry(reference.cache_key().clone()) {
            Entry::Occupied(entry) => {
                let live = entry.into_mut();
                live.dirty |= for_write;
                Ok(live)
            }
            Entry::Vacant(entry) => {
                let live = fetch_live(&self.shared, context, self.snapshot, reference, for_write, load)?;
                Ok(entry.insert(live))
            }
        }
    }

    /// Releases every cache reference and the read context, once.
    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let handles: Vec<Arc<ObjectHandle>> = self.live.drain().map(|(_, live)| live.handle).collect();
        self.shared.cache.release(&handles);
        if let Some(context) = self.context.take() {
            context.rollback();
        }
        self.shared.manager.end(self.snapshot);
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TransactionState::Active && !self.live.is_empty() {
            tracing::trace!(txn = %self.id, touched = self.live.len(), "dropped open transaction");
        }
        self.release();
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("snapshot", &self.snapshot)
            .field("state", &self.state)
            .field("touched", &self.live.len())
            .finish()
    }
}

fn not_a_record() -> CoreError {
    CoreError::invalid_operation("reference is a link set, not an object")
}

fn unexpected_type<T>() -> CoreError {
    CoreError::invalid_operation(format!("decoded object is not a {}", std::any::type_name::<T>()))
}

fn downcast_ref<T: 'static>(object: &dyn Any) -> CoreResult<&T> {
    object.downcast_ref::<T>().ok_or_else(|| unexpected_type::<T>())
}

/// Builds the working copy of an object the transaction touches first.
fn fetch_live(
    shared: &Shared,
    context: &dyn StoreContext,
    snapshot: SnapshotId,
    reference: ObjectRef,
    for_write: bool,
    load: bool,
) -> CoreResult<LiveVersion> {
    let handle = shared.cache.acquire(&reference, context, load)?;

    if !load {
        let object = if reference.is_link() {
            LiveObject::Links(LinkSet::new())
        } else {
            LiveObject::Record(None)
        };
        return Ok(LiveVersion {
            handle,
            object,
            dirty: for_write,
        });
    }

    match decode_visible(&handle, context, snapshot) {
        Ok(object) => Ok(LiveVersion {
            handle,
            object,
            dirty: for_write,
        }),
        Err(err) => {
            shared.cache.release([&handle]);
            Err(err)
        }
    }
}

/// Decodes the version of `handle` visible at `snapshot`.
///
/// Falls back to the backend when the cached chain does not reach back to
/// `snapshot`.
fn decode_visible(
    handle: &ObjectHandle,
    context: &dyn StoreContext,
    snapshot: SnapshotId,
) -> CoreResult<LiveObject> {
    let reference = handle.reference();
    if let Some(version) = handle.version_as_of(snapshot) {
        return decode_object(reference, version.payload());
    }

    tracing::trace!(object = %reference, snapshot = %snapshot, "reading past cached versions");
    match context.get(reference.cache_key().as_bytes())? {
        Some(stored) => decode_object(reference, &stored.bytes),
        None => decode_object(reference, &[]),
    }
}

fn decode_object(reference: &ObjectRef, bytes: &[u8]) -> CoreResult<LiveObject> {
    if reference.is_link() {
        Ok(LiveObject::Links(LinkSet::from_original(decode_links(bytes)?)))
    } else {
        Ok(LiveObject::Record(reference.type_info().codec().decode(bytes)?))
    }
}

fn encode_object(reference: &ObjectRef, object: &LiveObject) -> CoreResult<Vec<u8>> {
    match object {
        LiveObject::Record(record) => {
            let record = record.as_ref().map(|r| &**r as &dyn Any);
            Ok(reference.type_info().codec().encode(record)?)
        }
        LiveObject::Links(links) => Ok(encode_links(&links.effective_keys())?),
    }
}

/// Writes every dirty version as one batch at `snapshot`, then pushes the
/// new versions onto their chains. The caller holds every object lock.
fn write_versions(shared: &Shared, dirty: &[&LiveVersion], snapshot: SnapshotId) -> CoreResult<()> {
    let mut context = shared.store.new_context(snapshot.as_u64())?;

    let mut staged = Vec::with_capacity(dirty.len());
    for live in dirty {
        let reference = live.handle.reference();
        let payload = match encode_object(reference, &live.object) {
            Ok(payload) => payload,
            Err(err) => {
                context.rollback();
                return Err(err);
            }
        };

        context.store(reference.cache_key().as_bytes(), &payload);
        if let LiveObject::Links(links) = &live.object {
            for target in links.removed() {
                context.remove_index(reference.sibling(target).cache_key().as_bytes(), reference.key());
            }
            for target in links.added() {
                context.add_index(reference.sibling(target).cache_key().as_bytes(), reference.key());
            }
        }
        staged.push((&live.handle, payload));
    }

    context.commit(snapshot.as_u64())?;

    let horizon = shared.manager.horizon();
    for (handle, payload) in staged {
        handle.apply_version(payload, snapshot, horizon);
    }
    Ok(())
}
