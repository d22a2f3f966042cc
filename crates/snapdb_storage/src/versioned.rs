//! Multi-version key/value map shared by the backends.

use crate::backend::{StoredValue, TypeDescriptor, TypeTags};
use crate::error::{StorageError, StorageResult};
use std::collections::BTreeMap;
use std::ops::Bound;

/// Separator between the target and source parts of an index key.
const INDEX_SEPARATOR: u8 = 0;

/// A staged storage operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Insert or overwrite a value.
    Put {
        /// Storage key.
        key: Vec<u8>,
        /// Encoded payload (never empty).
        value: Vec<u8>,
    },
    /// Delete a value.
    Delete {
        /// Storage key.
        key: Vec<u8>,
    },
    /// Add an index entry.
    AddIndex {
        /// Target link key.
        target: Vec<u8>,
        /// Source object key.
        source: String,
    },
    /// Remove an index entry.
    RemoveIndex {
        /// Target link key.
        target: Vec<u8>,
        /// Source object key.
        source: String,
    },
}

/// An ordered list of staged operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages a put, or a delete when `value` is empty.
    pub fn store(&mut self, key: &[u8], value: &[u8]) {
        if value.is_empty() {
            self.ops.push(BatchOp::Delete { key: key.to_vec() });
        } else {
            self.ops.push(BatchOp::Put {
                key: key.to_vec(),
                value: value.to_vec(),
            });
        }
    }

    /// Stages an index insertion.
    pub fn add_index(&mut self, target: &[u8], source: &str) {
        self.ops.push(BatchOp::AddIndex {
            target: target.to_vec(),
            source: source.to_string(),
        });
    }

    /// Stages an index removal.
    pub fn remove_index(&mut self, target: &[u8], source: &str) {
        self.ops.push(BatchOp::RemoveIndex {
            target: target.to_vec(),
            source: source.to_string(),
        });
    }

    /// Appends an already-built operation.
    pub fn push(&mut self, op: BatchOp) {
        self.ops.push(op);
    }

    /// Returns the staged operations in order.
    #[must_use]
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Returns the number of staged operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Per-key history, ascending by snapshot.
type History<T> = Vec<(u64, T)>;

fn visible<T>(history: &History<T>, snapshot: u64) -> Option<&(u64, T)> {
    let idx = history.partition_point(|(s, _)| *s <= snapshot);
    idx.checked_sub(1).map(|i| &history[i])
}

fn record<T>(history: &mut History<T>, snapshot: u64, value: T) {
    match history.binary_search_by_key(&snapshot, |(s, _)| *s) {
        Ok(i) => history[i].1 = value,
        Err(i) => history.insert(i, (snapshot, value)),
    }
}

/// Drops versions hidden from every snapshot `>= horizon`.
fn prune<T>(history: &mut History<T>, horizon: u64) -> usize {
    let keep_from = history
        .partition_point(|(s, _)| *s <= horizon)
        .saturating_sub(1);
    history.drain(..keep_from).count()
}

/// Builds the storage key of an index entry.
#[must_use]
pub fn index_key(target: &[u8], source: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(target.len() + 1 + source.len());
    key.extend_from_slice(target);
    key.push(INDEX_SEPARATOR);
    key.extend_from_slice(source.as_bytes());
    key
}

/// Every committed version of every value and index entry.
///
/// Values are tombstoned with an empty payload rather than removed, so a
/// reader at an older snapshot still sees what was there.
#[derive(Debug, Default)]
pub struct VersionedMap {
    values: BTreeMap<Vec<u8>, History<Vec<u8>>>,
    index: BTreeMap<Vec<u8>, History<bool>>,
    last_snapshot: u64,
}

impl VersionedMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the highest snapshot applied so far.
    #[must_use]
    pub fn last_snapshot(&self) -> u64 {
        self.last_snapshot
    }

    /// Returns the number of distinct value keys, tombstones included.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.values.len()
    }

    /// Returns the value visible at `snapshot`.
    #[must_use]
    pub fn get_as_of(&self, key: &[u8], snapshot: u64) -> Option<StoredValue> {
        let history = self.values.get(key)?;
        visible(history, snapshot).map(|(s, bytes)| StoredValue {
            snapshot: *s,
            bytes: bytes.clone(),
        })
    }

    /// Returns the newest value.
    #[must_use]
    pub fn get_latest(&self, key: &[u8]) -> Option<StoredValue> {
        self.get_as_of(key, u64::MAX)
    }

    /// Applies a batch at `snapshot`.
    pub fn apply(&mut self, batch: &WriteBatch, snapshot: u64) {
        for op in batch.ops() {
            match op {
                BatchOp::Put { key, value } => {
                    record(self.values.entry(key.clone()).or_default(), snapshot, value.clone());
                }
                BatchOp::Delete { key } => {
                    // Deleting a key nobody ever wrote leaves nothing to hide.
                    if let Some(history) = self.values.get_mut(key) {
                        record(history, snapshot, Vec::new());
                    }
                }
                BatchOp::AddIndex { target, source } => {
                    let key = index_key(target, source);
                    record(self.index.entry(key).or_default(), snapshot, true);
                }
                BatchOp::RemoveIndex { target, source } => {
                    let key = index_key(target, source);
                    if let Some(history) = self.index.get_mut(&key) {
                        record(history, snapshot, false);
                    }
                }
            }
        }
        self.last_snapshot = self.last_snapshot.max(snapshot);
    }

    /// Sources indexed under `target` at `snapshot`, strictly after `from`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidKey`] if a source is not UTF-8.
    pub fn scan_index(
        &self,
        target: &[u8],
        from: &str,
        limit: Option<usize>,
        snapshot: u64,
    ) -> StorageResult<Vec<String>> {
        let mut prefix = target.to_vec();
        prefix.push(INDEX_SEPARATOR);
        scan(&self.index, &prefix, from, limit, |history| {
            matches!(visible(history, snapshot), Some((_, true)))
        })
    }

    /// Live value keys beginning with `prefix` at `snapshot`, strictly after
    /// `from`, with the prefix stripped.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidKey`] if a key is not UTF-8.
    pub fn scan_values(
        &self,
        prefix: &[u8],
        from: &str,
        limit: Option<usize>,
        snapshot: u64,
    ) -> StorageResult<Vec<String>> {
        scan(&self.values, prefix, from, limit, |history| {
            matches!(visible(history, snapshot), Some((_, bytes)) if !bytes.is_empty())
        })
    }

    /// Drops history that no snapshot `>= horizon` can observe.
    ///
    /// Keys whose only remaining version is a tombstone or a removed index
    /// entry are dropped entirely. Returns the number of versions removed.
    pub fn compact(&mut self, horizon: u64) -> usize {
        let mut removed = 0;
        self.values.retain(|_, history| {
            removed += prune(history, horizon);
            let dead = history.len() == 1 && history[0].0 <= horizon && history[0].1.is_empty();
            if dead {
                removed += 1;
            }
            !dead
        });
        self.index.retain(|_, history| {
            removed += prune(history, horizon);
            let dead = history.len() == 1 && history[0].0 <= horizon && !history[0].1;
            if dead {
                removed += 1;
            }
            !dead
        });
        removed
    }
}

fn scan<T>(
    map: &BTreeMap<Vec<u8>, History<T>>,
    prefix: &[u8],
    from: &str,
    limit: Option<usize>,
    live: impl Fn(&History<T>) -> bool,
) -> StorageResult<Vec<String>> {
    let limit = limit.unwrap_or(usize::MAX);
    if limit == 0 {
        return Ok(Vec::new());
    }

    let mut start = prefix.to_vec();
    start.extend_from_slice(from.as_bytes());
    let lower = if from.is_empty() {
        Bound::Included(start)
    } else {
        Bound::Excluded(start)
    };

    let mut keys = Vec::new();
    for (key, history) in map.range::<Vec<u8>, _>((lower, Bound::Unbounded)) {
        if !key.starts_with(prefix) {
            break;
        }
        if !live(history) {
            continue;
        }
        let suffix = std::str::from_utf8(&key[prefix.len()..])
            .map_err(|_| StorageError::InvalidKey)?;
        keys.push(suffix.to_string());
        if keys.len() >= limit {
            break;
        }
    }
    Ok(keys)
}

/// Allocates and remembers type and link tags.
#[derive(Debug, Clone)]
pub struct TypeTable {
    types: BTreeMap<String, TypeTags>,
    next_type_tag: u16,
}

impl Default for TypeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeTable {
    /// Creates an empty table; the first type gets tag 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            types: BTreeMap::new(),
            next_type_tag: 1,
        }
    }

    /// Returns the tags of a registered type.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&TypeTags> {
        self.types.get(name)
    }

    /// Returns the number of known types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns true if no type is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Registers a type, allocating tags for anything new.
    ///
    /// Returns the tags and whether anything was allocated.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::TagsExhausted`] if no tag is left.
    pub fn register(&mut self, descriptor: &TypeDescriptor) -> StorageResult<(TypeTags, bool)> {
        let mut changed = false;

        if !self.types.contains_key(&descriptor.name) {
            let tag = self.next_type_tag;
            if tag == u16::MAX {
                return Err(StorageError::TagsExhausted(descriptor.name.clone()));
            }
            self.next_type_tag += 1;
            self.types.insert(
                descriptor.name.clone(),
                TypeTags {
                    type_tag: tag,
                    link_tags: BTreeMap::new(),
                },
            );
            changed = true;
        }

        let Some(tags) = self.types.get_mut(&descriptor.name) else {
            return Err(StorageError::Corrupted(format!(
                "type table lost {}",
                descriptor.name
            )));
        };
        for link in &descriptor.links {
            if tags.link_tags.contains_key(link) {
                continue;
            }
            let next = tags.link_tags.values().copied().max().unwrap_or(0);
            if next == u16::MAX {
                return Err(StorageError::TagsExhausted(format!(
                    "{}::{}",
                    descriptor.name, link
                )));
            }
            tags.link_tags.insert(link.clone(), next + 1);
            changed = true;
        }

        Ok((tags.clone(), changed))
    }

    /// Restores tags read back from persistent storage.
    pub fn restore(&mut self, name: &str, tags: TypeTags) {
        self.next_type_tag = self.next_type_tag.max(tags.type_tag.saturating_add(1));
        self.types.insert(name.to_string(), tags);
    }
}
