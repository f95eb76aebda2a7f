//! Cross-process guard for update passes.
//!
//! The daemon and one-off CLI commands run in separate processes over the
//! same store. [`PassLock`] is a lock file created exclusively in the data
//! directory; it records the holder's pid and start time so that a lock left
//! behind by a crashed process can be taken over.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Age after which a lock is taken over regardless of its holder (1 hour).
pub const DEFAULT_STALE_LOCK_SECS: u64 = 3600;

/// Contents of the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

impl LockHolder {
    fn current() -> Self {
        Self {
            pid: process::id(),
            acquired_at: Utc::now(),
        }
    }

    fn age(&self) -> Duration {
        (Utc::now() - self.acquired_at).to_std().unwrap_or_default()
    }

    fn is_alive(&self) -> bool {
        if cfg!(target_os = "linux") {
            Path::new(&format!("/proc/{}", self.pid)).exists()
        } else {
            true
        }
    }
}

/// Held lock file; removed on drop.
#[derive(Debug)]
pub struct PassLock {
    path: PathBuf,
}

impl PassLock {
    /// Try to take the lock at `path`.
    ///
    /// Returns `Ok(None)` when a live process holds it. Locks older than
    /// `stale_after`, unreadable locks and locks of dead processes are
    /// replaced.
    pub fn acquire(path: &Path, stale_after: Duration) -> Result<Option<Self>, StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::CreateDir {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        for _ in 0..2 {
            match Self::create(path) {
                Ok(lock) => return Ok(Some(lock)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(lock_error(path, e)),
            }

            match Self::holder(path) {
                Some(holder) if holder.age() < stale_after && holder.is_alive() => {
                    tracing::debug!(
                        path = %path.display(),
                        pid = holder.pid,
                        "Update pass lock held by another process"
                    );
                    return Ok(None);
                }
                holder => {
                    tracing::warn!(
                        path = %path.display(),
                        pid = holder.as_ref().map(|h| h.pid),
                        "Replacing abandoned update pass lock"
                    );
                    match fs::remove_file(path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => return Err(lock_error(path, e)),
                    }
                }
            }
        }
        // Lost the race for a freshly freed lock.
        Ok(None)
    }

    /// Read the current holder of the lock at `path`, if any.
    pub fn holder(path: &Path) -> Option<LockHolder> {
        let content = fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    fn create(path: &Path) -> io::Result<Self> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        let lock = Self {
            path: path.to_path_buf(),
        };
        let content = serde_json::to_string(&LockHolder::current())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PassLock {
    fn drop(&mut self) {
        let ours = Self::holder(&self.path).is_some_and(|h| h.pid == process::id());
        if ours {
            if let Err(e) = fs::remove_file(&self.path) {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to release update pass lock");
            }
        }
    }
}

fn lock_error(path: &Path, source: io::Error) -> StorageError {
    StorageError::Lock {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const STALE: Duration = Duration::from_secs(DEFAULT_STALE_LOCK_SECS);

    fn write_holder(path: &Path, holder: &LockHolder) {
        fs::write(path, serde_json::to_string(holder).unwrap()).unwrap();
    }

    #[test]
    fn test_acquire_and_release() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state").join("pass.lock");

        let lock = PassLock::acquire(&path, STALE).unwrap().unwrap();
        assert_eq!(PassLock::holder(&path).unwrap().pid, process::id());
        assert!(PassLock::acquire(&path, STALE).unwrap().is_none());

        drop(lock);
        assert!(!path.exists());
        assert!(PassLock::acquire(&path, STALE).unwrap().is_some());
    }

    #[test]
    fn test_old_lock_is_replaced() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("pass.lock");
        write_holder(
            &path,
            &LockHolder {
                pid: process::id(),
                acquired_at: Utc::now() - chrono::Duration::hours(2),
            },
        );

        let lock = PassLock::acquire(&path, STALE).unwrap();
        assert!(lock.is_some());
    }

    #[test]
    fn test_unreadable_lock_is_replaced() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("pass.lock");
        fs::write(&path, "not json").unwrap();

        assert!(PassLock::acquire(&path, STALE).unwrap().is_some());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_dead_holder_is_replaced() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("pass.lock");
        write_holder(
            &path,
            &LockHolder {
                pid: u32::MAX - 1,
                acquired_at: Utc::now(),
            },
        );

        assert!(PassLock::acquire(&path, STALE).unwrap().is_some());
    }

    #[test]
    fn test_drop_leaves_foreign_lock() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("pass.lock");
        let lock = PassLock::acquire(&path, STALE).unwrap().unwrap();

        let foreign = LockHolder {
            pid: process::id().wrapping_add(1),
            acquired_at: Utc::now(),
        };
        write_holder(&path, &foreign);
        drop(lock);

        assert_eq!(PassLock::holder(&path), Some(foreign));
    }
}
