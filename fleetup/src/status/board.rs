//! Status board holding the latest outcome messages.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::cache::PackageInfo;

/// A message with the time it was recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StampedMessage {
    pub at: DateTime<Utc>,
    pub message: String,
}

impl StampedMessage {
    /// Stamp a message with the current time.
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            message: message.into(),
        }
    }
}

/// Point-in-time copy of the status board.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Last manifest check.
    pub last_check: Option<StampedMessage>,
    /// Last informational message.
    pub last_info: Option<StampedMessage>,
    /// Last error.
    pub last_error: Option<StampedMessage>,
    /// Last download message.
    pub last_download: Option<StampedMessage>,
    /// Last successful install per package.
    #[serde(default)]
    pub installs: BTreeMap<String, DateTime<Utc>>,
    /// Managed package versions as of the last refresh.
    #[serde(default)]
    pub packages: Vec<PackageInfo>,
    /// Error from the last failed manifest fetch.
    pub retrieval_error: Option<StampedMessage>,
}

/// Latest status of the agent.
///
/// When created with [`StatusBoard::persistent`], every change is also
/// written as JSON so other processes (such as `fleetup status`) can read it.
#[derive(Debug, Default)]
pub struct StatusBoard {
    state: RwLock<StatusSnapshot>,
    path: Option<PathBuf>,
}

impl StatusBoard {
    /// In-memory status board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Status board persisted at `path`, starting from its current contents.
    pub fn persistent(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = Self::load(&path).unwrap_or_default();
        Self {
            state: RwLock::new(state),
            path: Some(path),
        }
    }

    /// Read a persisted snapshot.
    pub fn load(path: &Path) -> Option<StatusSnapshot> {
        let contents = fs::read_to_string(path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable status file");
                None
            }
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.state.read().clone()
    }

    pub fn record_check(&self, message: impl Into<String>) {
        let stamped = StampedMessage::now(message);
        self.update(|s| s.last_check = Some(stamped));
    }

    pub fn record_info(&self, message: impl Into<String>) {
        let stamped = StampedMessage::now(message);
        self.update(|s| s.last_info = Some(stamped));
    }

    pub fn record_error(&self, message: impl Into<String>) {
        let stamped = StampedMessage::now(message);
        self.update(|s| s.last_error = Some(stamped));
    }

    pub fn record_download(&self, message: impl Into<String>) {
        let stamped = StampedMessage::now(message);
        self.update(|s| s.last_download = Some(stamped));
    }

    /// Record a verified install of `package`.
    pub fn record_install(&self, package: &str) {
        let now = Utc::now();
        self.update(|s| {
            s.installs.insert(package.to_string(), now);
        });
    }

    /// Replace the package version table.
    pub fn set_packages(&self, packages: Vec<PackageInfo>, retrieval_error: Option<StampedMessage>) {
        self.update(|s| {
            s.packages = packages;
            s.retrieval_error = retrieval_error;
        });
    }

    fn update(&self, apply: impl FnOnce(&mut StatusSnapshot)) {
        let mut state = self.state.write();
        apply(&mut state);

        if let Some(path) = &self.path {
            if let Err(e) = save(path, &state) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to write status file");
            }
        }
    }
}

fn save(path: &Path, snapshot: &StatusSnapshot) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(snapshot)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)
}
