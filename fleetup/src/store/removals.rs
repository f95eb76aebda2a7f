//! Pending removal table.

use rusqlite::{params, OptionalExtension};

use super::PackageStore;
use crate::error::StorageError;

impl PackageStore {
    /// Record that a package awaits uninstall. Idempotent.
    pub fn add_pending_removal(&self, name: &str) -> Result<(), StorageError> {
        let _table = self.removals_lock.lock();
        self.conn.lock().execute(
            "INSERT OR IGNORE INTO pending_removals (package) VALUES (?1)",
            params![name],
        )?;
        Ok(())
    }

    /// Clear a pending removal. Returns rows removed.
    pub fn remove_pending_removal(&self, name: &str) -> Result<usize, StorageError> {
        let _table = self.removals_lock.lock();
        let removed = self.conn.lock().execute(
            "DELETE FROM pending_removals WHERE package = ?1",
            params![name],
        )?;
        Ok(removed)
    }

    /// Whether a package awaits uninstall.
    pub fn is_pending_removal(&self, name: &str) -> Result<bool, StorageError> {
        let _table = self.removals_lock.lock();
        let found = self
            .conn
            .lock()
            .query_row(
                "SELECT 1 FROM pending_removals WHERE package = ?1",
                params![name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Names of all packages awaiting uninstall.
    pub fn list_pending_removals(&self) -> Result<Vec<String>, StorageError> {
        let _table = self.removals_lock.lock();
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT package FROM pending_removals ORDER BY id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let names = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }
}
