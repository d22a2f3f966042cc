//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The batch log is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// The store has been closed.
    #[error("storage is closed")]
    Closed,

    /// The store ran out of type or link tags.
    #[error("tag space exhausted for {0}")]
    TagsExhausted(String),

    /// A stored index key was not valid UTF-8.
    #[error("index key is not valid UTF-8")]
    InvalidKey,
}
