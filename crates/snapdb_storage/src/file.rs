//! Persistent store backed by an append-only batch log.

use crate::backend::{Store, StoreContext, TypeDescriptor, TypeTags};
use crate::error::{StorageError, StorageResult};
use crate::log::{decode_frames, Frame};
use crate::state::{StateContext, StoreState};
use crate::versioned::{TypeTable, VersionedMap};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Options for [`LogStore::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogStoreOptions {
    /// Create the log file (and parent directories) if it does not exist.
    pub create_if_missing: bool,
    /// Call `sync_data` after every committed batch.
    pub sync_on_commit: bool,
}

impl Default for LogStoreOptions {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_commit: true,
        }
    }
}

impl LogStoreOptions {
    /// Sets whether a missing log file is created.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether every commit is synced to disk.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }
}

/// The open log file.
#[derive(Debug)]
pub(crate) struct LogFile {
    file: File,
    sync_on_commit: bool,
}

impl LogFile {
    /// Appends one frame.
    pub(crate) fn append(&mut self, frame: &Frame) -> StorageResult<()> {
        let bytes = frame.encode()?;
        self.file.write_all(&bytes)?;
        self.file.flush()?;
        if self.sync_on_commit {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Forces everything written so far to disk.
    pub(crate) fn sync(&mut self) -> StorageResult<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

/// A persistent, multi-version store.
///
/// Type registrations and committed batches are appended to a single log
/// file of CRC-protected frames. On open the log is replayed into memory;
/// a torn trailing frame left by a crash is truncated away.
///
/// Reads are served from memory, so the whole history must fit in RAM.
///
/// # Example
///
/// ```no_run
/// use snapdb_storage::{LogStore, LogStoreOptions, Store};
///
/// let store = LogStore::open("data/snap.log", LogStoreOptions::default()).unwrap();
/// let mut ctx = store.new_context(store.last_snapshot()).unwrap();
/// ctx.store(b"key", b"value");
/// ctx.commit(store.last_snapshot() + 1).unwrap();
/// store.close().unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct LogStore {
    path: PathBuf,
    state: Arc<StoreState>,
}

impl LogStore {
    /// Opens the log at `path`, replaying any existing content.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing and `create_if_missing` is
    /// off, if it cannot be opened, or if it is corrupted.
    pub fn open(path: impl AsRef<Path>, options: LogStoreOptions) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            if !options.create_if_missing {
                return Err(StorageError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("log file {} does not exist", path.display()),
                )));
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .create(options.create_if_missing)
            .append(true)
            .open(&path)?;

        let bytes = std::fs::read(&path)?;
        let (frames, valid) = decode_frames(&bytes)?;
        if valid < bytes.len() {
            tracing::warn!(
                path = %path.display(),
                discarded = bytes.len() - valid,
                "truncating torn frame at end of log"
            );
            file.set_len(valid as u64)?;
            file.sync_all()?;
        }

        let mut map = VersionedMap::new();
        let mut types = TypeTable::new();
        let mut batches = 0usize;
        for frame in frames {
            match frame {
                Frame::Type { name, tags } => types.restore(&name, tags),
                Frame::Batch { snapshot, batch } => {
                    map.apply(&batch, snapshot);
                    batches += 1;
                }
            }
        }

        tracing::info!(
            path = %path.display(),
            types = types.len(),
            batches,
            last_snapshot = map.last_snapshot(),
            "opened log store"
        );

        let log = LogFile {
            file,
            sync_on_commit: options.sync_on_commit,
        };
        Ok(Self {
            path,
            state: Arc::new(StoreState::new(map, types, Some(log))),
        })
    }

    /// Returns the path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Store for LogStore {
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
        format!("log:{}", self.path.display())
    }

    fn close(&self) -> StorageResult<()> {
        if !self.state.is_closed() {
            tracing::info!(path = %self.path.display(), "closing log store");
        }
        self.state.close()
    }
}
