//! Persistent key-value preferences and the session flags built on them.
//!
//! Preferences hold the small amount of state that lives outside the package
//! store: the `managed` session flag, the self-update flag, the time of the
//! last update pass and the download resume markers. Writes are
//! last-write-wins per key.
//!
//! # Implementors
//!
//! - [`IniPreferences`]: an INI file on disk, rewritten on every change
//! - [`MemoryPreferences`]: in-memory map for tests and dry runs

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ini::Ini;
use parking_lot::Mutex;

use crate::error::StorageError;

/// INI section holding all preference keys.
const SECTION: &str = "preferences";

/// Key for the persisted `managed` flag.
pub const KEY_MANAGED: &str = "is_managed";

/// Key for the persisted self-update flag.
pub const KEY_SELF_UPDATE: &str = "self_update";

/// Key for the last manifest poll frequency, in minutes.
pub const KEY_POLL_FREQUENCY: &str = "poll_frequency_minutes";

/// Key for the start time of the last update pass, RFC 3339.
pub const KEY_LAST_PASS: &str = "last_pass_at";

/// Persistent key-value store.
pub trait Preferences: Send + Sync {
    /// Read a raw value.
    fn get(&self, key: &str) -> Option<String>;

    /// Write a raw value.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete a value. Deleting a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Read a boolean, falling back to `default` when unset or unparsable.
    fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key).as_deref().map(str::trim) {
            Some("true") | Some("1") => true,
            Some("false") | Some("0") => false,
            _ => default,
        }
    }

    /// Write a boolean.
    fn set_bool(&self, key: &str, value: bool) -> Result<(), StorageError> {
        self.set(key, if value { "true" } else { "false" })
    }

    /// Read an unsigned integer.
    fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }
}

// =============================================================================
// INI-backed preferences
// =============================================================================

/// Preferences stored in an INI file.
///
/// Every access re-reads the file, so a daemon and a CLI command sharing it
/// see each other's changes. Changes rewrite the file through a temporary
/// file.
pub struct IniPreferences {
    path: PathBuf,
    ini: Mutex<Ini>,
}

impl IniPreferences {
    /// Open the preference file, creating an empty one if it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::CreateDir {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let ini = if path.exists() {
            Ini::load_from_file(&path).map_err(|e| StorageError::Preferences {
                path: path.clone(),
                reason: e.to_string(),
            })?
        } else {
            Ini::new()
        };

        Ok(Self {
            path,
            ini: Mutex::new(ini),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace `ini` with the file's current contents. A missing file keeps
    /// the cached values.
    fn reload(&self, ini: &mut Ini) {
        if !self.path.exists() {
            return;
        }
        match Ini::load_from_file(&self.path) {
            Ok(fresh) => *ini = fresh,
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to reload preferences, using cached values"
            ),
        }
    }

    fn persist(&self, ini: &Ini) -> Result<(), StorageError> {
        let tmp = self.path.with_extension("ini.tmp");
        ini.write_to_file(&tmp)
            .and_then(|_| fs::rename(&tmp, &self.path))
            .map_err(|e| StorageError::Preferences {
                path: self.path.clone(),
                reason: e.to_string(),
            })
    }
}

impl Preferences for IniPreferences {
    fn get(&self, key: &str) -> Option<String> {
        let mut ini = self.ini.lock();
        self.reload(&mut ini);
        ini.section(Some(SECTION))
            .and_then(|s| s.get(key))
            .map(str::to_string)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut ini = self.ini.lock();
        self.reload(&mut ini);
        ini.with_section(Some(SECTION)).set(key, value);
        self.persist(&ini)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut ini = self.ini.lock();
        self.reload(&mut ini);
        if ini.delete_from(Some(SECTION), key).is_none() {
            return Ok(());
        }
        self.persist(&ini)
    }
}

// =============================================================================
// In-memory preferences
// =============================================================================

/// Preferences held in memory only.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Preferences for MemoryPreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.values.lock().remove(key);
        Ok(())
    }
}

// =============================================================================
// Session flags
// =============================================================================

/// The `managed` and self-update flags, persisted in preferences.
///
/// The `managed` flag comes from the last manifest and decides whether newly
/// queued updates are applied automatically. The self-update flag is set
/// right before the agent installs its own package and is read once at the
/// next start.
#[derive(Clone)]
pub struct SessionFlags {
    prefs: Arc<dyn Preferences>,
}

impl SessionFlags {
    pub fn new(prefs: Arc<dyn Preferences>) -> Self {
        Self { prefs }
    }

    /// Current value of the `managed` flag. Unset means unmanaged.
    pub fn managed(&self) -> bool {
        self.prefs.get_bool(KEY_MANAGED, false)
    }

    /// Persist the `managed` flag.
    pub fn set_managed(&self, managed: bool) -> Result<(), StorageError> {
        self.prefs.set_bool(KEY_MANAGED, managed)
    }

    /// Whether a self-update install is in flight.
    pub fn self_update_pending(&self) -> bool {
        self.prefs.get_bool(KEY_SELF_UPDATE, false)
    }

    /// Set or clear the self-update flag.
    pub fn set_self_update_pending(&self, pending: bool) -> Result<(), StorageError> {
        if pending {
            self.prefs.set_bool(KEY_SELF_UPDATE, true)
        } else {
            self.prefs.remove(KEY_SELF_UPDATE)
        }
    }

    /// Read and clear the self-update flag.
    ///
    /// Returns `true` at most once per set.
    pub fn take_self_update_pending(&self) -> Result<bool, StorageError> {
        let pending = self.self_update_pending();
        if pending {
            self.prefs.remove(KEY_SELF_UPDATE)?;
        }
        Ok(pending)
    }

    /// Start time of the last update pass in any process.
    pub fn last_pass(&self) -> Option<DateTime<Utc>> {
        let raw = self.prefs.get(KEY_LAST_PASS)?;
        DateTime::parse_from_rfc3339(raw.trim())
            .ok()
            .map(|at| at.with_timezone(&Utc))
    }

    /// Record the start of an update pass.
    pub fn set_last_pass(&self, at: DateTime<Utc>) -> Result<(), StorageError> {
        self.prefs.set(KEY_LAST_PASS, &at.to_rfc3339())
    }

    /// Underlying preference store.
    pub fn preferences(&self) -> &Arc<dyn Preferences> {
        &self.prefs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_preferences_roundtrip() {
        let prefs = MemoryPreferences::new();
        assert_eq!(prefs.get("a"), None);
        prefs.set("a", "1").unwrap();
        assert_eq!(prefs.get_u64("a"), Some(1));
        prefs.remove("a").unwrap();
        prefs.remove("a").unwrap();
        assert_eq!(prefs.get("a"), None);
    }

    #[test]
    fn test_get_bool_defaults() {
        let prefs = MemoryPreferences::new();
        assert!(prefs.get_bool("missing", true));
        prefs.set("flag", "garbage").unwrap();
        assert!(!prefs.get_bool("flag", false));
        prefs.set_bool("flag", true).unwrap();
        assert!(prefs.get_bool("flag", false));
    }

    #[test]
    fn test_ini_preferences_persist_across_open() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state").join("preferences.ini");

        let prefs = IniPreferences::open(&path).unwrap();
        prefs.set("last_modified", "Tue, 01 Oct 2024 10:00:00 GMT").unwrap();
        prefs.set_bool(KEY_MANAGED, true).unwrap();
        drop(prefs);

        let reopened = IniPreferences::open(&path).unwrap();
        assert_eq!(
            reopened.get("last_modified").as_deref(),
            Some("Tue, 01 Oct 2024 10:00:00 GMT")
        );
        assert!(reopened.get_bool(KEY_MANAGED, false));
    }

    #[test]
    fn test_ini_preferences_remove() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("preferences.ini");

        let prefs = IniPreferences::open(&path).unwrap();
        prefs.set("k", "v").unwrap();
        prefs.remove("k").unwrap();
        drop(prefs);

        assert_eq!(IniPreferences::open(&path).unwrap().get("k"), None);
    }

    #[test]
    fn test_ini_preferences_shared_between_handles() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("preferences.ini");

        let daemon = IniPreferences::open(&path).unwrap();
        let cli = IniPreferences::open(&path).unwrap();
        daemon.set("resume.a", "marker").unwrap();
        cli.set_bool(KEY_MANAGED, true).unwrap();
        daemon.set(KEY_POLL_FREQUENCY, "5").unwrap();

        assert!(daemon.get_bool(KEY_MANAGED, false));
        assert_eq!(cli.get("resume.a").as_deref(), Some("marker"));

        cli.remove("resume.a").unwrap();
        assert_eq!(daemon.get("resume.a"), None);

        let reopened = IniPreferences::open(&path).unwrap();
        assert!(reopened.get_bool(KEY_MANAGED, false));
        assert_eq!(reopened.get_u64(KEY_POLL_FREQUENCY), Some(5));
        assert_eq!(reopened.get("resume.a"), None);
    }

    #[test]
    fn test_last_pass_roundtrip() {
        let flags = SessionFlags::new(Arc::new(MemoryPreferences::new()));
        assert!(flags.last_pass().is_none());

        let at = DateTime::parse_from_rfc3339("2026-03-01T08:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        flags.set_last_pass(at).unwrap();
        assert_eq!(flags.last_pass(), Some(at));

        flags.preferences().set(KEY_LAST_PASS, "yesterday").unwrap();
        assert!(flags.last_pass().is_none());
    }

    #[test]
    fn test_session_flags_managed_default_false() {
        let flags = SessionFlags::new(Arc::new(MemoryPreferences::new()));
        assert!(!flags.managed());
        flags.set_managed(true).unwrap();
        assert!(flags.managed());
    }

    #[test]
    fn test_take_self_update_pending_once() {
        let flags = SessionFlags::new(Arc::new(MemoryPreferences::new()));
        flags.set_self_update_pending(true).unwrap();

        assert!(flags.take_self_update_pending().unwrap());
        assert!(!flags.take_self_update_pending().unwrap());
        assert!(!flags.self_update_pending());
    }
}
