//! Transaction state.

use crate::object::{LinkSet, ObjectHandle};
use crate::types::SnapshotId;
use snapdb_codec::AnyObject;
use std::fmt;
use std::sync::Arc;

/// State of a transaction.
///
/// `Active` moves to `Cancelled`, or through `Committing` to one of
/// `Finished`, `Aborted` or `Error`. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Transaction was abandoned by the caller.
    Cancelled,
    /// Commit is in progress.
    Committing,
    /// Transaction committed.
    Finished,
    /// A conflicting commit won; nothing was written.
    Aborted,
    /// The backend failed during commit.
    Error,
}

impl TransactionState {
    /// Returns true if the state can no longer change.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Finished | Self::Aborted | Self::Error
        )
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Active => "active",
            Self::Cancelled => "cancelled",
            Self::Committing => "committing",
            Self::Finished => "finished",
            Self::Aborted => "aborted",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Result of [`crate::Database::transact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactOutcome {
    /// The closure's changes committed at this snapshot.
    ///
    /// Read-only transactions report the snapshot they read at.
    Committed(SnapshotId),
    /// The closure cancelled the transaction.
    Cancelled,
    /// Conflicts kept aborting the transaction until the timeout passed.
    TimedOut {
        /// Number of times the closure ran.
        attempts: u32,
    },
}

impl TransactOutcome {
    /// Returns true for [`TransactOutcome::Committed`].
    #[must_use]
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }
}

/// A transaction's private decoded value.
pub(crate) enum LiveObject {
    /// A plain object; `None` is the absent object.
    Record(Option<AnyObject>),
    /// A link set.
    Links(LinkSet),
}

/// A transaction-local working copy of one object.
pub(crate) struct LiveVersion {
    pub(crate) handle: Arc<ObjectHandle>,
    pub(crate) object: LiveObject,
    pub(crate) dirty: bool,
}

impl fmt::Debug for LiveVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveVersion")
            .field("object", self.handle.reference())
            .field("dirty", &self.dirty)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!TransactionState::Active.is_terminal());
        assert!(!TransactionState::Committing.is_terminal());
        for state in [
            TransactionState::Cancelled,
            TransactionState::Finished,
            TransactionState::Aborted,
            TransactionState::Error,
        ] {
            assert!(state.is_terminal());
        }
        assert_eq!(TransactionState::Aborted.to_string(), "aborted");
    }

    #[test]
    fn outcome_helpers() {
        assert!(TransactOutcome::Committed(SnapshotId::new(1)).is_committed());
        assert!(!TransactOutcome::Cancelled.is_committed());
        assert!(!TransactOutcome::TimedOut { attempts: 3 }.is_committed());
    }
}
