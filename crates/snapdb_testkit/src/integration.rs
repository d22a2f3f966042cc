//! Cross-crate integration test helpers.
//!
//! [`ModelHarness`] commits item workloads through a real database and
//! mirrors every committed change in plain collections, so the database
//! can be checked against a trivially correct model.

use crate::fixtures::{Item, TestDatabase, ITEM, RELATED};
use crate::generators::ItemOperation;
use snapdb_core::{CoreResult, Database, TransactOutcome, Transaction};
use std::collections::{BTreeMap, BTreeSet};

/// A test harness for model-based integration testing.
pub struct ModelHarness {
    /// The database under test.
    pub db: TestDatabase,
    items: BTreeMap<String, Item>,
    links: BTreeMap<String, BTreeSet<String>>,
}

impl ModelHarness {
    /// Creates a harness over an in-memory database.
    pub fn new() -> Self {
        Self::with_database(TestDatabase::memory())
    }

    /// Creates a harness over an existing test database, which must be
    /// empty.
    pub fn with_database(db: TestDatabase) -> Self {
        Self {
            db,
            items: BTreeMap::new(),
            links: BTreeMap::new(),
        }
    }

    /// Commits `ops` as one transaction and mirrors them in the model.
    pub fn apply(&mut self, ops: &[ItemOperation]) {
        let outcome = self
            .db
            .transact(|txn| ops.iter().try_for_each(|op| apply_to_txn(txn, op)), None)
            .expect("Failed to commit operations");
        assert!(outcome.is_committed(), "unexpected outcome {outcome:?}");

        for op in ops {
            self.apply_to_model(op);
        }
    }

    fn apply_to_model(&mut self, op: &ItemOperation) {
        match op {
            ItemOperation::Set { key, name } => {
                self.items.insert(key.clone(), Item::new(name.clone()));
            }
            ItemOperation::Delete { key } => {
                self.items.remove(key);
            }
            ItemOperation::AddLink { key, target } => {
                self.links.entry(key.clone()).or_default().insert(target.clone());
            }
            ItemOperation::RemoveLink { key, target } => {
                self.links.entry(key.clone()).or_default().remove(target);
            }
            ItemOperation::SetLinks { key, targets } => {
                self.links
                    .insert(key.clone(), targets.iter().cloned().collect());
            }
        }
    }

    /// Closes and reopens a file-backed database, keeping the model.
    pub fn reopen(self) -> Self {
        Self {
            db: self.db.reopen(),
            items: self.items,
            links: self.links,
        }
    }

    /// Asserts that the database matches the model.
    pub fn verify(&self) {
        verify_against(&self.db, &self.items, &self.links);
    }
}

impl Default for ModelHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_to_txn(txn: &mut Transaction, op: &ItemOperation) -> CoreResult<()> {
    match op {
        ItemOperation::Set { key, name } => txn.set(ITEM, key, Item::new(name.clone())),
        ItemOperation::Delete { key } => txn.delete(ITEM, key),
        ItemOperation::AddLink { key, target } => txn.add_link(ITEM, RELATED, key, target),
        ItemOperation::RemoveLink { key, target } => txn.remove_link(ITEM, RELATED, key, target),
        ItemOperation::SetLinks { key, targets } => {
            txn.set_links(ITEM, RELATED, key, targets.iter().map(String::as_str))
        }
    }
}

fn verify_against(
    db: &Database,
    items: &BTreeMap<String, Item>,
    links: &BTreeMap<String, BTreeSet<String>>,
) {
    let listed = db
        .begin()
        .and_then(|txn| txn.list_slice(ITEM, "", None))
        .expect("Failed to list items")
        .all();
    let expected: Vec<String> = items.keys().cloned().collect();
    assert_eq!(listed, expected, "item listing mismatch");

    for (key, item) in items {
        let actual = db.read_one::<Item>(ITEM, key).expect("Failed to read item");
        assert_eq!(actual.as_ref(), Some(item), "item mismatch for {key}");
    }

    let mut reverse: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for (key, targets) in links {
        let actual = db
            .read_links_one(ITEM, RELATED, key)
            .expect("Failed to read links");
        let expected: Vec<String> = targets.iter().cloned().collect();
        assert_eq!(actual, expected, "links mismatch for {key}");

        for target in targets {
            reverse.entry(target.as_str()).or_default().push(key.clone());
        }
    }

    for (target, mut sources) in reverse {
        sources.sort();
        let found = db
            .find_slice(ITEM, RELATED, target, "", None)
            .expect("Failed to scan reverse index");
        assert_eq!(found, sources, "reverse index mismatch for {target}");
    }
}

/// Returns true if `outcome` committed, panicking on timeouts.
pub fn committed(outcome: TransactOutcome) -> bool {
    match outcome {
        TransactOutcome::Committed(_) => true,
        TransactOutcome::Cancelled => false,
        TransactOutcome::TimedOut { attempts } => panic!("timed out after {attempts} attempts"),
    }
}
