//! Typed `section.key` names for configuration values.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use reqwest::Url;

use super::ConfigFile;
use crate::error::ConfigError;

/// A configuration setting addressable as `section.key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    ServerUrl,
    ServerAllowedHosts,
    ServerProxy,
    ServerTimeoutSecs,
    DeviceId,
    DeviceGroup,
    DeviceSelfPackage,
    ScheduleFrequencyMinutes,
    ScheduleMinIntervalSecs,
    ScheduleAutoInstall,
    ScheduleRetryAttempts,
    ScheduleRetryDelaySecs,
    StorageDataDir,
    StorageDatabase,
    StoragePreferences,
    StorageScratchDir,
    InstallerPmCommand,
    InstallerInstallTimeoutSecs,
    LoggingLevel,
    LoggingDirectory,
}

const ALL_KEYS: [ConfigKey; 20] = [
    ConfigKey::ServerUrl,
    ConfigKey::ServerAllowedHosts,
    ConfigKey::ServerProxy,
    ConfigKey::ServerTimeoutSecs,
    ConfigKey::DeviceId,
    ConfigKey::DeviceGroup,
    ConfigKey::DeviceSelfPackage,
    ConfigKey::ScheduleFrequencyMinutes,
    ConfigKey::ScheduleMinIntervalSecs,
    ConfigKey::ScheduleAutoInstall,
    ConfigKey::ScheduleRetryAttempts,
    ConfigKey::ScheduleRetryDelaySecs,
    ConfigKey::StorageDataDir,
    ConfigKey::StorageDatabase,
    ConfigKey::StoragePreferences,
    ConfigKey::StorageScratchDir,
    ConfigKey::InstallerPmCommand,
    ConfigKey::InstallerInstallTimeoutSecs,
    ConfigKey::LoggingLevel,
    ConfigKey::LoggingDirectory,
];

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl ConfigKey {
    /// All keys, grouped by section.
    pub fn all() -> &'static [ConfigKey] {
        &ALL_KEYS
    }

    /// Full `section.key` name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ServerUrl => "server.url",
            Self::ServerAllowedHosts => "server.allowed_hosts",
            Self::ServerProxy => "server.proxy",
            Self::ServerTimeoutSecs => "server.timeout_secs",
            Self::DeviceId => "device.id",
            Self::DeviceGroup => "device.group",
            Self::DeviceSelfPackage => "device.self_package",
            Self::ScheduleFrequencyMinutes => "schedule.frequency_minutes",
            Self::ScheduleMinIntervalSecs => "schedule.min_interval_secs",
            Self::ScheduleAutoInstall => "schedule.auto_install",
            Self::ScheduleRetryAttempts => "schedule.retry_attempts",
            Self::ScheduleRetryDelaySecs => "schedule.retry_delay_secs",
            Self::StorageDataDir => "storage.data_dir",
            Self::StorageDatabase => "storage.database",
            Self::StoragePreferences => "storage.preferences",
            Self::StorageScratchDir => "storage.scratch_dir",
            Self::InstallerPmCommand => "installer.pm_command",
            Self::InstallerInstallTimeoutSecs => "installer.install_timeout_secs",
            Self::LoggingLevel => "logging.level",
            Self::LoggingDirectory => "logging.directory",
        }
    }

    /// INI section name.
    pub fn section(&self) -> &'static str {
        self.name().split_once('.').map_or("", |(section, _)| section)
    }

    /// Key name within the section.
    pub fn key_name(&self) -> &'static str {
        self.name().split_once('.').map_or("", |(_, key)| key)
    }

    /// Current value as a string; empty when unset.
    pub fn get(&self, config: &ConfigFile) -> String {
        fn path(p: &Option<PathBuf>) -> String {
            p.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        }

        match self {
            Self::ServerUrl => config.server.url.clone(),
            Self::ServerAllowedHosts => config.server.allowed_hosts.join(","),
            Self::ServerProxy => config.server.proxy.clone().unwrap_or_default(),
            Self::ServerTimeoutSecs => config.server.timeout_secs.to_string(),
            Self::DeviceId => config.device.id.clone().unwrap_or_default(),
            Self::DeviceGroup => config.device.group.clone(),
            Self::DeviceSelfPackage => config.device.self_package.clone(),
            Self::ScheduleFrequencyMinutes => config.schedule.frequency_minutes.to_string(),
            Self::ScheduleMinIntervalSecs => config.schedule.min_interval_secs.to_string(),
            Self::ScheduleAutoInstall => config.schedule.auto_install.to_string(),
            Self::ScheduleRetryAttempts => config.schedule.retry_attempts.to_string(),
            Self::ScheduleRetryDelaySecs => config.schedule.retry_delay_secs.to_string(),
            Self::StorageDataDir => config.storage.data_dir.display().to_string(),
            Self::StorageDatabase => path(&config.storage.database),
            Self::StoragePreferences => path(&config.storage.preferences),
            Self::StorageScratchDir => path(&config.storage.scratch_dir),
            Self::InstallerPmCommand => config.installer.pm_command.clone(),
            Self::InstallerInstallTimeoutSecs => config.installer.install_timeout_secs.to_string(),
            Self::LoggingLevel => config.logging.level.clone(),
            Self::LoggingDirectory => path(&config.logging.directory),
        }
    }

    /// Parse and store a value. An empty value clears optional settings.
    pub fn set(&self, config: &mut ConfigFile, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        match self {
            Self::ServerUrl => config.server.url = self.parse_url(value)?,
            Self::ServerAllowedHosts => {
                config.server.allowed_hosts = value
                    .split(',')
                    .map(|h| h.trim().to_ascii_lowercase())
                    .filter(|h| !h.is_empty())
                    .collect()
            }
            Self::ServerProxy => config.server.proxy = optional(value),
            Self::ServerTimeoutSecs => config.server.timeout_secs = self.parse_positive(value)?,
            Self::DeviceId => config.device.id = optional(value),
            Self::DeviceGroup => config.device.group = self.required(value)?,
            Self::DeviceSelfPackage => config.device.self_package = self.required(value)?,
            Self::ScheduleFrequencyMinutes => {
                config.schedule.frequency_minutes = self.parse_positive(value)?
            }
            Self::ScheduleMinIntervalSecs => {
                config.schedule.min_interval_secs = self.parse_number(value)?
            }
            Self::ScheduleAutoInstall => config.schedule.auto_install = self.parse_bool(value)?,
            Self::ScheduleRetryAttempts => {
                config.schedule.retry_attempts = self.parse_positive(value)?
            }
            Self::ScheduleRetryDelaySecs => {
                config.schedule.retry_delay_secs = self.parse_number(value)?
            }
            Self::StorageDataDir => {
                config.storage.data_dir = PathBuf::from(self.required(value)?)
            }
            Self::StorageDatabase => config.storage.database = optional(value).map(PathBuf::from),
            Self::StoragePreferences => {
                config.storage.preferences = optional(value).map(PathBuf::from)
            }
            Self::StorageScratchDir => {
                config.storage.scratch_dir = optional(value).map(PathBuf::from)
            }
            Self::InstallerPmCommand => config.installer.pm_command = self.required(value)?,
            Self::InstallerInstallTimeoutSecs => {
                config.installer.install_timeout_secs = self.parse_positive(value)?
            }
            Self::LoggingLevel => {
                let level = value.to_ascii_lowercase();
                if !LOG_LEVELS.contains(&level.as_str()) {
                    return Err(self.invalid(value, "expected trace, debug, info, warn or error"));
                }
                config.logging.level = level;
            }
            Self::LoggingDirectory => {
                config.logging.directory = optional(value).map(PathBuf::from)
            }
        }
        Ok(())
    }

    fn invalid(&self, value: &str, reason: impl Into<String>) -> ConfigError {
        ConfigError::InvalidValue {
            key: self.name().to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    fn required(&self, value: &str) -> Result<String, ConfigError> {
        if value.is_empty() {
            return Err(self.invalid(value, "value must not be empty"));
        }
        Ok(value.to_string())
    }

    fn parse_number<T: FromStr>(&self, value: &str) -> Result<T, ConfigError> {
        value
            .parse()
            .map_err(|_| self.invalid(value, "expected a non-negative integer"))
    }

    fn parse_positive<T: FromStr + Default + PartialEq>(&self, value: &str) -> Result<T, ConfigError> {
        let number: T = self.parse_number(value)?;
        if number == T::default() {
            return Err(self.invalid(value, "must be greater than zero"));
        }
        Ok(number)
    }

    fn parse_bool(&self, value: &str) -> Result<bool, ConfigError> {
        match value.to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" => Ok(false),
            _ => Err(self.invalid(value, "expected true or false")),
        }
    }

    fn parse_url(&self, value: &str) -> Result<String, ConfigError> {
        let url = Url::parse(value).map_err(|e| self.invalid(value, e.to_string()))?;
        if url.scheme() != "https" {
            return Err(self.invalid(value, "server url must use https"));
        }
        if url.host_str().is_none() {
            return Err(self.invalid(value, "server url has no host"));
        }
        Ok(value.to_string())
    }
}

fn optional(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

impl FromStr for ConfigKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ALL_KEYS
            .iter()
            .copied()
            .find(|key| key.name() == wanted)
            .ok_or_else(|| ConfigError::UnknownKey(s.to_string()))
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
