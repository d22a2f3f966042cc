//! Storage contract consumed by the transaction engine.

use crate::error::StorageResult;
use crate::result_set::ResultSet;
use std::collections::BTreeMap;

/// Describes a registered object type to the store.
///
/// The store answers with the numeric tags used to build storage keys
/// for objects and link sets of this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    /// Type name, unique per database.
    pub name: String,
    /// Schema version of the encoded payloads.
    pub version: u16,
    /// Names of the link sets this type declares.
    pub links: Vec<String>,
}

/// Numeric tags assigned to a type and its links.
///
/// Tags are stable for the lifetime of the store. A persistent store
/// keeps them across reopen; tag `0` is never used for a link so that
/// plain objects (`link_tag == 0`) and link sets never share a prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeTags {
    /// Tag of the type itself.
    pub type_tag: u16,
    /// Tag per link name.
    pub link_tags: BTreeMap<String, u16>,
}

/// A committed value together with the snapshot that wrote it.
///
/// An empty `bytes` is a tombstone: the key was deleted at `snapshot`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
    /// Snapshot id of the commit that wrote this value.
    pub snapshot: u64,
    /// Encoded payload, empty for a deletion.
    pub bytes: Vec<u8>,
}

impl StoredValue {
    /// Returns true if this value records a deletion.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A key/value store with secondary-index support and snapshot reads.
///
/// Stores are **opaque byte stores**: keys and payloads are produced and
/// interpreted by the engine. A store must keep enough history to answer
/// reads as of any snapshot that is still in use, see [`Store::compact`].
///
/// # Invariants
///
/// - A context only observes commits with a snapshot id `<=` its own
/// - `StoreContext::commit` applies the whole batch or nothing
/// - Stores must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`crate::MemStore`] - For testing and ephemeral databases
/// - [`crate::LogStore`] - For persistent databases
pub trait Store: Send + Sync {
    /// Registers a type and returns its tags.
    ///
    /// Registering a name again returns the existing tags, extended with
    /// tags for any link names not seen before.
    ///
    /// # Errors
    ///
    /// Returns an error if the tag space is exhausted, the store is closed,
    /// or the registration cannot be persisted.
    fn register_type(&self, descriptor: &TypeDescriptor) -> StorageResult<TypeTags>;

    /// Begins a unit of storage work bound to a snapshot id.
    ///
    /// Reads through the context observe the store as of `snapshot`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::Closed`] if the store is closed.
    fn new_context(&self, snapshot: u64) -> StorageResult<Box<dyn StoreContext>>;

    /// Returns the highest snapshot id committed to this store.
    fn last_snapshot(&self) -> u64;

    /// Drops history no context older than `horizon` can observe.
    ///
    /// Returns the number of versions discarded.
    fn compact(&self, horizon: u64) -> usize;

    /// Short human-readable description of the backend.
    fn describe(&self) -> String;

    /// Flushes pending data and releases backend resources.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush fails.
    fn close(&self) -> StorageResult<()>;
}

/// A batched unit of storage work.
///
/// Writes are staged in the context and become visible only when
/// [`StoreContext::commit`] succeeds.
pub trait StoreContext: Send {
    /// Returns the snapshot id reads are bound to.
    fn snapshot(&self) -> u64;

    /// Point lookup as of the context snapshot.
    ///
    /// Returns `None` if the key had never been written at that snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed.
    fn get(&self, key: &[u8]) -> StorageResult<Option<StoredValue>>;

    /// Point lookup of the newest committed value, ignoring the snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed.
    fn get_latest(&self, key: &[u8]) -> StorageResult<Option<StoredValue>>;

    /// Stages a put, or a delete when `value` is empty.
    fn store(&mut self, key: &[u8], value: &[u8]);

    /// Stages an index entry `target -> source`.
    fn add_index(&mut self, target: &[u8], source: &str);

    /// Stages removal of the index entry `target -> source`.
    fn remove_index(&mut self, target: &[u8], source: &str);

    /// Lists every source indexed under `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed or an index key is corrupt.
    fn find(&self, target: &[u8]) -> StorageResult<ResultSet> {
        self.find_slice(target, "", None)
    }

    /// Lists sources indexed under `target` strictly after `from`, at most
    /// `limit` of them.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed or an index key is corrupt.
    fn find_slice(&self, target: &[u8], from: &str, limit: Option<usize>)
        -> StorageResult<ResultSet>;

    /// Lists live keys beginning with `prefix` strictly after `from`, with
    /// the prefix stripped.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed or a key is corrupt.
    fn list_slice(&self, prefix: &[u8], from: &str, limit: Option<usize>)
        -> StorageResult<ResultSet>;

    /// Returns the number of staged operations.
    fn pending(&self) -> usize;

    /// Atomically applies every staged write, tagged with `snapshot`.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch cannot be persisted; nothing is
    /// applied in that case.
    fn commit(self: Box<Self>, snapshot: u64) -> StorageResult<()>;

    /// Discards every staged write.
    fn rollback(self: Box<Self>);
}
