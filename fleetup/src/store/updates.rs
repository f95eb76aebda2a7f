//! Pending update table.

use rusqlite::{params, ErrorCode, OptionalExtension, Row};

use super::PackageStore;
use crate::error::StorageError;
use crate::package::{Action, PackageRef, UpdateRecord};

const TABLE: &str = "pending_updates";

/// Row as stored, before range checks.
struct RawUpdate {
    package: String,
    name: String,
    release: String,
    version: i64,
    url: String,
    action: i64,
    apply: bool,
}

impl RawUpdate {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            package: row.get(0)?,
            name: row.get(1)?,
            release: row.get(2)?,
            version: row.get(3)?,
            url: row.get(4)?,
            action: row.get(5)?,
            apply: row.get(6)?,
        })
    }

    fn into_record(self) -> Result<UpdateRecord, StorageError> {
        let version = u32::try_from(self.version).map_err(|_| StorageError::Corrupt {
            table: TABLE,
            reason: format!("{} has version {}", self.package, self.version),
        })?;
        let action = Action::from_code(self.action).ok_or_else(|| StorageError::Corrupt {
            table: TABLE,
            reason: format!("{} has action code {}", self.package, self.action),
        })?;

        Ok(UpdateRecord {
            package: PackageRef::new(self.package, self.name),
            release: self.release,
            version,
            url: self.url,
            action,
            apply: self.apply,
        })
    }
}

const SELECT_COLUMNS: &str =
    "SELECT package, name, release, version, url, action, apply FROM pending_updates";

impl PackageStore {
    /// Queue an update, replacing any pending update for the same package.
    ///
    /// The stored `apply` flag is the current `managed` flag, not the one on
    /// `record`.
    pub fn add_update(&self, record: &UpdateRecord) -> Result<(), StorageError> {
        let apply = self.flags.managed();
        let name = &record.package.qualified_name;

        let _table = self.updates_lock.lock();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM pending_updates WHERE package = ?1", params![name])?;
        tx.execute(
            "INSERT INTO pending_updates (package, name, release, version, url, action, apply)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                name,
                record.package.display_name,
                record.release,
                i64::from(record.version),
                record.url,
                record.action.code(),
                apply,
            ],
        )
        .map_err(|e| match e.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => StorageError::DuplicateUpdate(name.clone()),
            _ => StorageError::Database(e),
        })?;
        tx.commit()?;

        tracing::debug!(
            package = %name,
            version = record.version,
            action = %record.action,
            apply,
            "Queued pending update"
        );
        Ok(())
    }

    /// Remove the pending update for a package. Returns rows removed.
    pub fn remove_update(&self, name: &str) -> Result<usize, StorageError> {
        let _table = self.updates_lock.lock();
        let removed = self
            .conn
            .lock()
            .execute("DELETE FROM pending_updates WHERE package = ?1", params![name])?;
        if removed > 0 {
            tracing::debug!(package = name, "Removed pending update");
        }
        Ok(removed)
    }

    /// Remove every pending update. Returns rows removed.
    pub fn remove_all_updates(&self) -> Result<usize, StorageError> {
        let _table = self.updates_lock.lock();
        let removed = self.conn.lock().execute("DELETE FROM pending_updates", [])?;
        tracing::debug!(removed, "Purged pending updates");
        Ok(removed)
    }

    /// All pending updates in insertion order.
    pub fn get_updates(&self) -> Result<Vec<UpdateRecord>, StorageError> {
        let _table = self.updates_lock.lock();
        let raw = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(&format!("{} ORDER BY id", SELECT_COLUMNS))?;
            let rows = stmt.query_map([], RawUpdate::from_row)?;
            let collected = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            collected
        };
        raw.into_iter().map(RawUpdate::into_record).collect()
    }

    /// The pending update for one package, if any.
    pub fn get_update(&self, name: &str) -> Result<Option<UpdateRecord>, StorageError> {
        let _table = self.updates_lock.lock();
        let raw = self
            .conn
            .lock()
            .query_row(
                &format!("{} WHERE package = ?1", SELECT_COLUMNS),
                params![name],
                RawUpdate::from_row,
            )
            .optional()?;
        raw.map(RawUpdate::into_record).transpose()
    }

    /// Set the apply flag of a pending update.
    ///
    /// Returns `false` when the package has no pending update.
    pub fn set_apply(&self, name: &str, apply: bool) -> Result<bool, StorageError> {
        let _table = self.updates_lock.lock();
        let changed = self.conn.lock().execute(
            "UPDATE pending_updates SET apply = ?2 WHERE package = ?1",
            params![name, apply],
        )?;
        Ok(changed > 0)
    }

    /// Apply flag of a pending update, or `None` when there is none.
    pub fn get_apply(&self, name: &str) -> Result<Option<bool>, StorageError> {
        let _table = self.updates_lock.lock();
        let apply = self
            .conn
            .lock()
            .query_row(
                "SELECT apply FROM pending_updates WHERE package = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(apply)
    }
}
