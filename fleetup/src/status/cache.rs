//! Cached version information for managed packages.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::board::StampedMessage;
use crate::device::PackageInspector;
use crate::package::PackageRef;

/// How an installed package compares to the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionState {
    /// Installed version is older than the manifest.
    Behind,
    /// Installed version matches the manifest.
    Current,
    /// Installed version is newer than the manifest.
    Ahead,
    /// The package is not installed.
    NotInstalled,
    /// No manifest version is known yet.
    Unknown,
}

impl VersionState {
    /// Compare an installed version with the manifest version.
    pub fn from_versions(available: Option<u32>, installed: Option<u32>) -> Self {
        match (available, installed) {
            (_, None) => Self::NotInstalled,
            (None, Some(_)) => Self::Unknown,
            (Some(available), Some(installed)) if installed < available => Self::Behind,
            (Some(available), Some(installed)) if installed > available => Self::Ahead,
            _ => Self::Current,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Behind => "behind",
            Self::Current => "current",
            Self::Ahead => "ahead",
            Self::NotInstalled => "not installed",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for VersionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Version information for one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    pub display_name: String,
    /// Version offered by the last manifest.
    pub available_version: Option<u32>,
    /// Version installed on the device.
    pub installed_version: Option<u32>,
    pub state: VersionState,
    /// Human-readable result of the last check.
    #[serde(default)]
    pub message: String,
    pub checked_at: DateTime<Utc>,
}

impl PackageInfo {
    fn new(package: &PackageRef, available: Option<u32>, installed: Option<u32>) -> Self {
        let state = VersionState::from_versions(available, installed);
        let message = match (state, available) {
            (VersionState::Behind, Some(v)) => format!("Version {} available", v),
            (VersionState::NotInstalled, Some(v)) => format!("Version {} will be installed", v),
            (VersionState::Ahead, _) => "Installed version is newer than offered".to_string(),
            (VersionState::Current, _) => "Up to date".to_string(),
            _ => "No version offered".to_string(),
        };
        Self {
            name: package.qualified_name.clone(),
            display_name: package.display_name.clone(),
            available_version: available,
            installed_version: installed,
            state,
            message,
            checked_at: Utc::now(),
        }
    }
}

/// Per-package version cache.
///
/// Fed by the reconciler with manifest and installed versions, and refreshed
/// from the package manager when a pipeline run completes.
#[derive(Debug, Default)]
pub struct PackageInfoCache {
    entries: RwLock<BTreeMap<String, PackageInfo>>,
    retrieval_error: RwLock<Option<StampedMessage>>,
}

impl PackageInfoCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record what the reconciler saw for a package.
    pub fn observe(&self, package: &PackageRef, available: Option<u32>, installed: Option<u32>) {
        let info = PackageInfo::new(package, available, installed);
        self.entries
            .write()
            .insert(package.qualified_name.clone(), info);
    }

    /// Re-read installed versions for `managed`, dropping packages that are
    /// no longer managed. Manifest versions are kept. A package the package
    /// manager cannot report on keeps its previously known installed version.
    pub fn refresh(&self, managed: &[PackageRef], inspector: &dyn PackageInspector) {
        let mut entries = self.entries.write();
        let refreshed: BTreeMap<String, PackageInfo> = managed
            .iter()
            .map(|package| {
                let previous = entries.get(&package.qualified_name);
                let available = previous.and_then(|info| info.available_version);
                let installed = match inspector.installed_version(&package.qualified_name) {
                    Ok(installed) => installed,
                    Err(e) => {
                        tracing::warn!(
                            package = %package.qualified_name,
                            error = %e,
                            "Failed to read installed version, keeping last known"
                        );
                        previous.and_then(|info| info.installed_version)
                    }
                };
                (
                    package.qualified_name.clone(),
                    PackageInfo::new(package, available, installed),
                )
            })
            .collect();
        *entries = refreshed;
    }

    pub fn get(&self, name: &str) -> Option<PackageInfo> {
        self.entries.read().get(name).cloned()
    }

    /// All entries ordered by name.
    pub fn entries(&self) -> Vec<PackageInfo> {
        self.entries.read().values().cloned().collect()
    }

    /// Record that the last manifest fetch failed.
    pub fn set_retrieval_error(&self, message: impl Into<String>) {
        *self.retrieval_error.write() = Some(StampedMessage::now(message));
    }

    pub fn clear_retrieval_error(&self) {
        *self.retrieval_error.write() = None;
    }

    pub fn retrieval_error(&self) -> Option<StampedMessage> {
        self.retrieval_error.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InstallError;
    use std::collections::HashMap;

    struct FixedInspector(HashMap<String, u32>);

    impl PackageInspector for FixedInspector {
        fn installed_version(&self, name: &str) -> Result<Option<u32>, InstallError> {
            if name.starts_with("broken") {
                return Err(InstallError::Query {
                    package: name.to_string(),
                    reason: "exit status: 1".to_string(),
                });
            }
            Ok(self.0.get(name).copied())
        }
    }

    #[test]
    fn test_version_state() {
        assert_eq!(VersionState::from_versions(Some(2), Some(1)), VersionState::Behind);
        assert_eq!(VersionState::from_versions(Some(2), Some(2)), VersionState::Current);
        assert_eq!(VersionState::from_versions(Some(2), Some(3)), VersionState::Ahead);
        assert_eq!(VersionState::from_versions(Some(2), None), VersionState::NotInstalled);
        assert_eq!(VersionState::from_versions(None, Some(2)), VersionState::Unknown);
    }

    #[test]
    fn test_observe_and_get() {
        let cache = PackageInfoCache::new();
        cache.observe(&PackageRef::new("a", "A"), Some(2), Some(1));

        let info = cache.get("a").unwrap();
        assert_eq!(info.state, VersionState::Behind);
        assert_eq!(info.display_name, "A");
        assert_eq!(info.message, "Version 2 available");
        assert!(cache.get("b").is_none());
    }

    #[test]
    fn test_refresh_keeps_manifest_version_and_drops_unmanaged() {
        let cache = PackageInfoCache::new();
        cache.observe(&PackageRef::new("a", "A"), Some(2), Some(1));
        cache.observe(&PackageRef::new("gone", "Gone"), Some(1), Some(1));

        let inspector = FixedInspector(HashMap::from([("a".to_string(), 2)]));
        cache.refresh(&[PackageRef::new("a", "A")], &inspector);

        let entries = cache.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].installed_version, Some(2));
        assert_eq!(entries[0].available_version, Some(2));
        assert_eq!(entries[0].state, VersionState::Current);
    }

    #[test]
    fn test_refresh_keeps_last_known_version_on_query_failure() {
        let cache = PackageInfoCache::new();
        cache.observe(&PackageRef::new("broken", "Broken"), Some(3), Some(2));

        let inspector = FixedInspector(HashMap::new());
        cache.refresh(&[PackageRef::new("broken", "Broken")], &inspector);

        let info = cache.get("broken").unwrap();
        assert_eq!(info.installed_version, Some(2));
        assert_eq!(info.state, VersionState::Behind);
    }

    #[test]
    fn test_retrieval_error() {
        let cache = PackageInfoCache::new();
        assert!(cache.retrieval_error().is_none());
        cache.set_retrieval_error("timeout");
        assert_eq!(cache.retrieval_error().unwrap().message, "timeout");
        cache.clear_retrieval_error();
        assert!(cache.retrieval_error().is_none());
    }
}
