//! Managed package table.

use rusqlite::{params, OptionalExtension};

use super::PackageStore;
use crate::error::StorageError;
use crate::package::PackageRef;

impl PackageStore {
    /// Start managing a package. Re-adding refreshes the display name.
    pub fn add_managed(&self, name: &str, display_name: &str) -> Result<(), StorageError> {
        let _table = self.managed_lock.lock();
        self.conn.lock().execute(
            "INSERT INTO managed_packages (package, name) VALUES (?1, ?2)
             ON CONFLICT(package) DO UPDATE SET name = excluded.name",
            params![name, display_name],
        )?;
        tracing::debug!(package = name, "Managing package");
        Ok(())
    }

    /// Stop managing a package and queue it for removal.
    ///
    /// Both changes commit together. The pending removal is recorded whether
    /// or not the package was managed. Returns `true` when a managed record
    /// was deleted.
    pub fn stop_managing(&self, name: &str) -> Result<bool, StorageError> {
        let _managed = self.managed_lock.lock();
        let _removals = self.removals_lock.lock();
        let mut conn = self.conn.lock();

        let tx = conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM managed_packages WHERE package = ?1",
            params![name],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO pending_removals (package) VALUES (?1)",
            params![name],
        )?;
        tx.commit()?;

        tracing::info!(package = name, "Stopped managing package");
        Ok(removed > 0)
    }

    /// Whether a package is managed.
    pub fn is_managed(&self, name: &str) -> Result<bool, StorageError> {
        let _table = self.managed_lock.lock();
        let found = self
            .conn
            .lock()
            .query_row(
                "SELECT 1 FROM managed_packages WHERE package = ?1",
                params![name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// All managed packages in the order they were first managed.
    pub fn list_managed(&self) -> Result<Vec<PackageRef>, StorageError> {
        let _table = self.managed_lock.lock();
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT package, name FROM managed_packages ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(PackageRef::new(
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
            ))
        })?;
        let managed = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(managed)
    }
}
