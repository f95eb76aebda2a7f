//! Pending update records.

use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use reqwest::Url;
use thiserror::Error;

use super::core::PackageRef;

/// Stored code for [`Action::Clean`].
const ACTION_CODE_CLEAN: i64 = 1;

/// Stored code for [`Action::Update`].
const ACTION_CODE_UPDATE: i64 = 2;

/// How the installer pipeline applies an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Action {
    /// Install the new artifact over the existing one.
    #[default]
    Update,
    /// Uninstall the existing package first, then install.
    Clean,
}

impl Action {
    /// Manifest spelling of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Update => "UPDATE",
            Self::Clean => "CLEAN",
        }
    }

    /// Integer code used in the package store.
    pub fn code(&self) -> i64 {
        match self {
            Self::Update => ACTION_CODE_UPDATE,
            Self::Clean => ACTION_CODE_CLEAN,
        }
    }

    /// Decode a stored integer code.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            ACTION_CODE_UPDATE => Some(Self::Update),
            ACTION_CODE_CLEAN => Some(Self::Clean),
            _ => None,
        }
    }

    /// Parse a manifest action, falling back to [`Action::Update`].
    ///
    /// Matching is case-insensitive. Unknown actions are logged.
    pub fn from_manifest(value: &str) -> Self {
        value.parse().unwrap_or_else(|_| {
            tracing::warn!(action = value, "Unknown manifest action, treating as UPDATE");
            Self::Update
        })
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UPDATE" => Ok(Self::Update),
            "CLEAN" => Ok(Self::Clean),
            other => Err(format!("unknown action '{}'", other)),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reasons a manifest descriptor cannot become an [`UpdateRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidRecord {
    #[error("package name is empty")]
    EmptyName,

    #[error("release label is empty")]
    EmptyRelease,

    #[error("version {0} is out of range")]
    VersionOutOfRange(i64),

    #[error("download url '{0}' is not a valid http(s) url")]
    InvalidUrl(String),
}

/// A pending update for one package.
///
/// At most one record exists per qualified name; queuing a new one replaces
/// the previous record. The [`Deref`] implementation gives direct access to
/// the [`PackageRef`] fields.
///
/// # Example
///
/// ```
/// use fleetup::package::{Action, PackageRef, UpdateRecord};
///
/// let record = UpdateRecord::new(
///     PackageRef::new("org.example.app", "Example"),
///     "2.0",
///     2,
///     "https://updates.example.org/app-2.pkg",
///     Action::Update,
/// )
/// .unwrap();
///
/// assert_eq!(record.qualified_name, "org.example.app");
/// assert!(!record.apply);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRecord {
    /// Package being updated.
    pub package: PackageRef,

    /// Release label shown to operators.
    pub release: String,

    /// Target version code.
    pub version: u32,

    /// Artifact download URL.
    pub url: String,

    /// How the update is applied.
    pub action: Action,

    /// Whether the pipeline should apply this update.
    pub apply: bool,
}

impl UpdateRecord {
    /// Create a validated record with `apply` unset.
    pub fn new(
        package: PackageRef,
        release: impl Into<String>,
        version: u32,
        url: impl Into<String>,
        action: Action,
    ) -> Result<Self, InvalidRecord> {
        let record = Self {
            package,
            release: release.into(),
            version,
            url: url.into(),
            action,
            apply: false,
        };
        record.validate()?;
        Ok(record)
    }

    /// Convert a signed manifest version into a version code.
    pub fn version_from_i64(version: i64) -> Result<u32, InvalidRecord> {
        u32::try_from(version).map_err(|_| InvalidRecord::VersionOutOfRange(version))
    }

    /// Set the apply flag.
    pub fn with_apply(mut self, apply: bool) -> Self {
        self.apply = apply;
        self
    }

    /// Check the record for fields the pipeline cannot act on.
    pub fn validate(&self) -> Result<(), InvalidRecord> {
        if self.package.qualified_name.trim().is_empty() {
            return Err(InvalidRecord::EmptyName);
        }
        if self.release.trim().is_empty() {
            return Err(InvalidRecord::EmptyRelease);
        }
        match Url::parse(&self.url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
            _ => Err(InvalidRecord::InvalidUrl(self.url.clone())),
        }
    }
}

impl Deref for UpdateRecord {
    type Target = PackageRef;

    fn deref(&self) -> &Self::Target {
        &self.package
    }
}
