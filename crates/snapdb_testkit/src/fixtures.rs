//! Test fixtures and database helpers.
//!
//! Provides the record types used across the test suite and test
//! databases that clean up after themselves.

use serde::{Deserialize, Serialize};
use snapdb_core::{CoreResult, Database, TypeDef};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Type name of [`Counter`] records.
pub const COUNTER: &str = "counter";

/// Type name of [`Item`] records.
pub const ITEM: &str = "item";

/// Link from an item to related items.
pub const RELATED: &str = "related";

/// A numeric counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    /// Current value.
    pub value: u64,
}

/// A named item that can link to other items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Display name.
    pub name: String,
}

impl Item {
    /// Creates an item.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Registers [`Counter`] and [`Item`] with `db`.
///
/// # Errors
///
/// Fails if either type is already registered.
pub fn register_fixture_types(db: &Database) -> CoreResult<()> {
    db.register_type::<Counter>(TypeDef::new(COUNTER))?;
    db.register_type::<Item>(TypeDef::new(ITEM).link(RELATED, ITEM))?;
    Ok(())
}

/// A test database with automatic cleanup.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    /// Log path for file-backed databases.
    path: Option<PathBuf>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestDatabase {
    /// Creates a new in-memory test database with the fixture types.
    pub fn memory() -> Self {
        let db = Database::open_in_memory().expect("Failed to open in-memory database");
        register_fixture_types(&db).expect("Failed to register fixture types");
        Self {
            db,
            path: None,
            _temp_dir: None,
        }
    }

    /// Creates a new log-backed test database with the fixture types.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("snap.log");
        let db = open_file_db(&path);
        Self {
            db,
            path: Some(path),
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the log path if file-based, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Closes the database and opens it again from its log.
    ///
    /// # Panics
    ///
    /// Panics on in-memory databases, which have nothing to reopen from.
    #[must_use]
    pub fn reopen(self) -> Self {
        let path = self
            .path
            .clone()
            .expect("Only file databases can be reopened");
        self.db.close().expect("Failed to close database");
        Self {
            db: open_file_db(&path),
            path: Some(path),
            _temp_dir: self._temp_dir,
        }
    }
}

fn open_file_db(path: &Path) -> Database {
    let db = Database::open_path(path).expect("Failed to open file database");
    register_fixture_types(&db).expect("Failed to register fixture types");
    db
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a temporary in-memory database.
///
/// # Example
///
/// ```rust
/// use snapdb_testkit::{with_temp_db, Item, ITEM};
///
/// with_temp_db(|db| {
///     db.transact(|txn| txn.set(ITEM, "a", Item::new("apple")), None).unwrap();
///     assert!(db.exists_one(ITEM, "a").unwrap());
/// });
/// ```
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::memory();
    f(&test_db.db)
}

/// Runs a test with a temporary log-backed database.
pub fn with_file_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database, &Path) -> R,
{
    let test_db = TestDatabase::file();
    let path = test_db
        .path()
        .expect("File database should have a path")
        .to_path_buf();
    f(&test_db.db, &path)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Creates a database holding `count` items keyed `item-000`,
    /// `item-001`, ... each related to the next.
    pub fn populated_database(count: usize) -> TestDatabase {
        let test_db = TestDatabase::memory();
        test_db
            .db
            .transact(
                |txn| {
                    for i in 0..count {
                        let key = item_key(i);
                        txn.set(ITEM, &key, Item::new(format!("item {i}")))?;
                        if i + 1 < count {
                            txn.add_link(ITEM, RELATED, &key, &item_key(i + 1))?;
                        }
                    }
                    Ok(())
                },
                None,
            )
            .expect("Failed to populate database");
        test_db
    }

    /// Key of the `i`th item in [`populated_database`].
    pub fn item_key(i: usize) -> String {
        format!("item-{i:03}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_database() {
        let test_db = TestDatabase::memory();
        assert!(test_db.path().is_none());
        assert_eq!(test_db.type_names(), vec![COUNTER, ITEM]);
    }

    #[test]
    fn test_file_database_reopens() {
        let test_db = TestDatabase::file();
        test_db
            .transact(|txn| txn.set(COUNTER, "c", Counter { value: 7 }), None)
            .unwrap();

        let test_db = test_db.reopen();
        assert_eq!(
            test_db.read_one::<Counter>(COUNTER, "c").unwrap(),
            Some(Counter { value: 7 })
        );
    }

    #[test]
    fn test_populated_scenario() {
        let test_db = scenarios::populated_database(5);
        assert!(test_db.exists_one(ITEM, "item-004").unwrap());
        assert_eq!(
            test_db.read_links_one(ITEM, RELATED, "item-000").unwrap(),
            vec!["item-001"]
        );
        assert_eq!(
            test_db.find_slice(ITEM, RELATED, "item-004", "", None).unwrap(),
            vec!["item-003"]
        );
    }
}
