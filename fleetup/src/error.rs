//! Error types for the update agent.
//!
//! Each concern gets its own error enum so callers can decide how far a
//! failure propagates:
//!
//! - [`StorageError`]: the package store or preferences failed; fatal to the
//!   current step.
//! - [`ProtocolError`]: the manifest exchange failed or returned something
//!   malformed; aborts the whole check cycle.
//! - [`TransferError`]: a package download failed; local to that package and
//!   resumable on the next run.
//! - [`InstallError`]: the privileged installer failed or timed out; local to
//!   that package.
//! - [`ConfigError`]: the configuration file could not be read or a value is
//!   invalid.
//!
//! [`UpdaterError`] wraps all of them for the top-level agent operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for top-level agent operations.
pub type UpdaterResult<T> = Result<T, UpdaterError>;

/// Errors raised by the package store and the preference store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The underlying database reported an error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A pending update already exists after the replace step.
    #[error("duplicate pending update for {0}")]
    DuplicateUpdate(String),

    /// A stored row could not be decoded.
    #[error("corrupt record in {table}: {reason}")]
    Corrupt { table: &'static str, reason: String },

    /// Failed to create the directory holding a store.
    #[error("failed to create directory {}: {source}", path.display())]
    CreateDir { path: PathBuf, source: io::Error },

    /// The preferences file could not be read or written.
    #[error("preferences file {}: {reason}", path.display())]
    Preferences { path: PathBuf, reason: String },

    /// The update pass lock file could not be created or removed.
    #[error("update pass lock {}: {source}", path.display())]
    Lock { path: PathBuf, source: io::Error },
}

/// Errors raised while requesting or parsing a manifest.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The response does not have the `managed=<flag>,<array>` shape.
    #[error("malformed manifest: {0}")]
    InvalidShape(String),

    /// The managed flag is present but not `0` or `1`.
    #[error("invalid managed flag '{0}'")]
    InvalidManagedFlag(String),

    /// The package array is not valid JSON.
    #[error("malformed package list: {0}")]
    MalformedJson(#[from] serde_json::Error),

    /// The server host is not on the allow-list.
    #[error("host '{0}' is not in the allowed host list")]
    HostNotAllowed(String),

    /// The configured server URL cannot be used.
    #[error("invalid server url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(String),

    /// The request could not be sent or the body could not be read.
    #[error("manifest request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    /// The server answered with a non-success status.
    #[error("manifest request to {url} returned status {status}")]
    Status { url: String, status: u16 },
}

/// Errors raised while downloading a package artifact.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The request could not be sent.
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    /// The download host is not in the allowed host list.
    #[error("download host '{0}' is not in the allowed host list")]
    HostNotAllowed(String),

    /// The server answered with an unexpected status.
    #[error("download from {url} returned status {status}")]
    Status { url: String, status: u16 },

    /// The server did not report a usable content length.
    #[error("download from {url} has no valid content length")]
    InvalidLength { url: String },

    /// Reading the response body failed.
    #[error("read error while downloading {url}: {source}")]
    Read { url: String, source: io::Error },

    /// Writing the scratch file failed.
    #[error("failed to write {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },

    /// The body ended before the advertised length.
    #[error("download from {url} ended after {received} of {expected} bytes")]
    Incomplete {
        url: String,
        received: u64,
        expected: u64,
    },

    /// The run was killed mid-transfer; resume markers were saved.
    #[error("download cancelled after {bytes} bytes")]
    Cancelled { bytes: u64 },
}

impl TransferError {
    /// Whether the failure came from a kill request rather than the transfer.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Errors raised by the privileged installer stage.
#[derive(Debug, Error)]
pub enum InstallError {
    /// The installer ran and reported failure.
    #[error("installer rejected {package} (code {code}): {message}")]
    Rejected {
        package: String,
        code: i32,
        message: String,
    },

    /// The installer did not report back in time.
    #[error("installer did not report for {package} within {secs}s")]
    Timeout { package: String, secs: u64 },

    /// The installer command could not be started.
    #[error("failed to run '{command}': {source}")]
    Spawn { command: String, source: io::Error },

    /// The package manager could not answer an install-state query.
    #[error("failed to query package manager for {package}: {reason}")]
    Query { package: String, reason: String },

    /// The completion callback was dropped without a report.
    #[error("installer dropped the completion callback for {0}")]
    NoReport(String),

    /// The installed version does not match the expected one.
    #[error("{package} reports version {actual:?} after install, expected {expected}")]
    VerificationFailed {
        package: String,
        expected: u32,
        actual: Option<u32>,
    },
}

/// Errors raised while loading or editing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config {}: {reason}", path.display())]
    Read { path: PathBuf, reason: String },

    /// The configuration file could not be written.
    #[error("failed to write config {}: {reason}", path.display())]
    Write { path: PathBuf, reason: String },

    /// A value could not be parsed.
    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    /// The key is not a known `section.key` pair.
    #[error("unknown configuration key '{0}'")]
    UnknownKey(String),

    /// No device identifier could be determined.
    #[error("no device id configured and none could be derived from the host")]
    NoDeviceId,

    /// The logging subscriber could not be installed.
    #[error("failed to initialize logging: {0}")]
    Logging(String),
}

/// Umbrella error for agent operations.
#[derive(Debug, Error)]
pub enum UpdaterError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Another process is running an update pass.
    #[error("another update pass is running")]
    Busy,

    /// A kill request stopped the operation.
    #[error("operation cancelled")]
    Cancelled,
}

impl UpdaterError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
