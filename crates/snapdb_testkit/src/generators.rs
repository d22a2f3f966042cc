//! Property-based test generators using proptest.
//!
//! Keys are drawn from a small alphabet so generated operations collide on
//! the same objects often.

use proptest::prelude::*;

/// Strategy for object keys: one or two lowercase letters from `a..=f`.
pub fn key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-f]{1,2}").expect("Invalid regex")
}

/// Strategy for item names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z ]{0,12}").expect("Invalid regex")
}

/// One step of a generated workload over items and their links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOperation {
    /// Create or replace an item.
    Set {
        /// Item key.
        key: String,
        /// New name.
        name: String,
    },
    /// Delete an item.
    Delete {
        /// Item key.
        key: String,
    },
    /// Link `key` to `target`.
    AddLink {
        /// Source key.
        key: String,
        /// Target key.
        target: String,
    },
    /// Unlink `key` from `target`.
    RemoveLink {
        /// Source key.
        key: String,
        /// Target key.
        target: String,
    },
    /// Replace every link of `key`.
    SetLinks {
        /// Source key.
        key: String,
        /// New targets.
        targets: Vec<String>,
    },
}

/// Strategy for a single item operation.
pub fn item_operation_strategy() -> impl Strategy<Value = ItemOperation> {
    prop_oneof![
        3 => (key_strategy(), name_strategy())
            .prop_map(|(key, name)| ItemOperation::Set { key, name }),
        1 => key_strategy().prop_map(|key| ItemOperation::Delete { key }),
        3 => (key_strategy(), key_strategy())
            .prop_map(|(key, target)| ItemOperation::AddLink { key, target }),
        2 => (key_strategy(), key_strategy())
            .prop_map(|(key, target)| ItemOperation::RemoveLink { key, target }),
        1 => (key_strategy(), prop::collection::vec(key_strategy(), 0..4))
            .prop_map(|(key, targets)| ItemOperation::SetLinks { key, targets }),
    ]
}

/// Strategy for transactions: each inner vector commits as one unit.
pub fn transaction_batches_strategy(
    max_transactions: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<Vec<ItemOperation>>> {
    prop::collection::vec(
        prop::collection::vec(item_operation_strategy(), 1..=max_ops),
        1..=max_transactions,
    )
}
