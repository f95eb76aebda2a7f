//! CLI error type.

use std::fmt;

use fleetup::error::{ConfigError, StorageError};
use fleetup::UpdaterError;

/// Errors reported by CLI commands.
#[derive(Debug)]
pub enum CliError {
    /// Configuration could not be loaded, validated or saved.
    Config(String),
    /// The agent failed.
    Updater(UpdaterError),
    /// A named package is not known to the store.
    NotFound(String),
    /// Output could not be produced.
    Output(String),
    /// The command was interrupted.
    Interrupted,
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Interrupted => 130,
            CliError::Config(_) => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Updater(e) => write!(f, "{}", e),
            CliError::NotFound(name) => write!(f, "Package not found: {}", name),
            CliError::Output(msg) => write!(f, "Output error: {}", msg),
            CliError::Interrupted => write!(f, "Interrupted"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Updater(e) => Some(e),
            _ => None,
        }
    }
}

impl From<UpdaterError> for CliError {
    fn from(e: UpdaterError) -> Self {
        match e {
            UpdaterError::Cancelled => CliError::Interrupted,
            UpdaterError::Config(e) => CliError::Config(e.to_string()),
            other => CliError::Updater(other),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<StorageError> for CliError {
    fn from(e: StorageError) -> Self {
        CliError::Updater(UpdaterError::Storage(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_maps_to_interrupted() {
        let err = CliError::from(UpdaterError::Cancelled);
        assert!(matches!(err, CliError::Interrupted));
        assert_eq!(err.exit_code(), 130);
    }

    #[test]
    fn test_config_error_message() {
        let err = CliError::from(ConfigError::UnknownKey("server.nope".to_string()));
        assert_eq!(
            err.to_string(),
            "Configuration error: unknown configuration key 'server.nope'"
        );
        assert_eq!(err.exit_code(), 2);
    }
}
