//! Persistent package store.
//!
//! Three tables, each guarded by its own reentrant lock:
//!
//! ```text
//! ┌──────────────────┐  ┌──────────────────┐  ┌──────────────────┐
//! │ pending_updates  │  │ managed_packages │  │ pending_removals │
//! │ (UpdateRecord)   │  │ (PackageRef)     │  │ (name)           │
//! └────────┬─────────┘  └────────┬─────────┘  └────────┬─────────┘
//!          │ updates_lock        │ managed_lock        │ removals_lock
//!          └─────────────────────┼─────────────────────┘
//!                                ▼
//!                    Mutex<rusqlite::Connection>
//! ```
//!
//! A table lock is held for a whole read-modify-write unit; the connection
//! mutex only for the statements inside it. Locks are always taken table
//! first, connection second. Only `stop_managing` holds two table locks, and
//! it takes the managed lock before the removals lock.

mod managed;
mod removals;
mod updates;

use std::fs;
use std::path::Path;

use parking_lot::{Mutex, ReentrantMutex};
use rusqlite::Connection;

use crate::error::StorageError;
use crate::preferences::SessionFlags;

/// Schema for all three tables.
const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS pending_updates (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        package     TEXT NOT NULL UNIQUE,
        name        TEXT NOT NULL,
        release     TEXT NOT NULL,
        version     INTEGER NOT NULL,
        url         TEXT NOT NULL,
        action      INTEGER NOT NULL,
        apply       INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS managed_packages (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        package     TEXT NOT NULL UNIQUE,
        name        TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS pending_removals (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        package     TEXT NOT NULL UNIQUE
    );
";

/// SQLite-backed store for pending updates, managed packages and pending
/// removals.
///
/// New pending updates take their `apply` flag from the session's `managed`
/// flag, which is why the store holds the [`SessionFlags`].
pub struct PackageStore {
    conn: Mutex<Connection>,
    flags: SessionFlags,
    updates_lock: ReentrantMutex<()>,
    managed_lock: ReentrantMutex<()>,
    removals_lock: ReentrantMutex<()>,
}

impl PackageStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path, flags: SessionFlags) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::CreateDir {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn, flags)
    }

    /// Open an in-memory database.
    pub fn open_in_memory(flags: SessionFlags) -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?, flags)
    }

    fn with_connection(conn: Connection, flags: SessionFlags) -> Result<Self, StorageError> {
        let store = Self {
            conn: Mutex::new(conn),
            flags,
            updates_lock: ReentrantMutex::new(()),
            managed_lock: ReentrantMutex::new(()),
            removals_lock: ReentrantMutex::new(()),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StorageError> {
        self.conn.lock().execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Session flags used for new pending updates.
    pub fn flags(&self) -> &SessionFlags {
        &self.flags
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{Action, PackageRef, UpdateRecord};
    use crate::preferences::MemoryPreferences;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_parent_and_persists() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("updater.db");
        let flags = SessionFlags::new(Arc::new(MemoryPreferences::new()));

        let store = PackageStore::open(&path, flags.clone()).unwrap();
        store.add_managed("org.example.app", "Example").unwrap();
        let record = UpdateRecord::new(
            PackageRef::new("org.example.app", "Example"),
            "2.0",
            2,
            "https://updates.example.org/app.pkg",
            Action::Update,
        )
        .unwrap();
        store.add_update(&record).unwrap();
        drop(store);

        let reopened = PackageStore::open(&path, flags).unwrap();
        assert!(reopened.is_managed("org.example.app").unwrap());
        assert_eq!(reopened.get_updates().unwrap().len(), 1);
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let store = test_support::memory_store(false);
        store.migrate().unwrap();
        store.migrate().unwrap();
        assert!(store.get_updates().unwrap().is_empty());
    }
}
