//! Error types for SnapDB core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in SnapDB core operations.
///
/// Write conflicts are not errors: they surface as an aborted transaction
/// and are retried by [`crate::Database::transact`]. Everything here is
/// either a backend failure or a programming error and is never retried.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] snapdb_storage::StorageError),

    /// Object codec error.
    #[error("codec error: {0}")]
    Codec(#[from] snapdb_codec::CodecError),

    /// Type name was never registered.
    #[error("unknown type: {name}")]
    UnknownType {
        /// Requested type name.
        name: String,
    },

    /// Link name is not declared by the type.
    #[error("unknown link {link} on type {type_name}")]
    UnknownLink {
        /// Type the link was looked up on.
        type_name: String,
        /// Requested link name.
        link: String,
    },

    /// Type name registered twice.
    #[error("type already registered: {name}")]
    DuplicateType {
        /// Offending type name.
        name: String,
    },

    /// Requested Rust type does not match the registered codec.
    #[error("type {type_name} stores {stored}, not {requested}")]
    TypeMismatch {
        /// Registered type name.
        type_name: String,
        /// Rust type of the registered codec.
        stored: &'static str,
        /// Rust type the caller asked for.
        requested: &'static str,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// Database is closed.
    #[error("database is closed")]
    DatabaseClosed,
}

impl CoreError {
    /// Creates an unknown type error.
    pub fn unknown_type(name: impl Into<String>) -> Self {
        Self::UnknownType { name: name.into() }
    }

    /// Creates an unknown link error.
    pub fn unknown_link(type_name: impl Into<String>, link: impl Into<String>) -> Self {
        Self::UnknownLink {
            type_name: type_name.into(),
            link: link.into(),
        }
    }

    /// Creates a duplicate type error.
    pub fn duplicate_type(name: impl Into<String>) -> Self {
        Self::DuplicateType { name: name.into() }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for errors caused by API misuse rather than the backend.
    #[must_use]
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownType { .. }
                | Self::UnknownLink { .. }
                | Self::DuplicateType { .. }
                | Self::TypeMismatch { .. }
                | Self::InvalidOperation { .. }
        )
    }
}
