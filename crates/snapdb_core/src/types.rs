//! Core type definitions for SnapDB.

use std::fmt;

/// Identifier of a committed database state.
///
/// Snapshot ids are allocated by the commit protocol, strictly increase,
/// and are never reused. A transaction reads as of one snapshot id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SnapshotId(pub u64);

impl SnapshotId {
    /// Creates a snapshot id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next snapshot id.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "snap:{}", self.0)
    }
}

/// Unique identifier for a transaction, used in logs.
///
/// Transaction IDs are monotonically increasing and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_ordering() {
        let s1 = SnapshotId::new(1);
        assert!(s1 < s1.next());
        assert_eq!(s1.next().as_u64(), 2);
    }

    #[test]
    fn display() {
        assert_eq!(SnapshotId::new(7).to_string(), "snap:7");
        assert_eq!(TransactionId::new(3).to_string(), "txn:3");
    }
}
