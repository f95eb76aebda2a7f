//! Configuration file handling.
//!
//! Settings live in an INI file, by default `~/.config/fleetup/config.ini`:
//!
//! ```ini
//! [server]
//! url = https://updater.example.org/updater/uapp/get/
//! allowed_hosts = updater.example.org
//! timeout_secs = 30
//!
//! [device]
//! group = default
//! self_package = org.fleetup.agent
//!
//! [schedule]
//! frequency_minutes = 10
//! auto_install = true
//! ```
//!
//! Every key is described by a [`ConfigKey`]; loading and saving walk the
//! key list so the file format and `config get/set` cannot drift apart.

mod keys;

use std::fs;
use std::path::{Path, PathBuf};

use ini::Ini;

use crate::error::ConfigError;

pub use keys::ConfigKey;

/// Default manifest server URL.
pub const DEFAULT_SERVER_URL: &str = "https://updater.example.org/updater/uapp/get/";

/// Default manifest request timeout in seconds.
pub const DEFAULT_SERVER_TIMEOUT_SECS: u64 = 30;

/// Default device group.
pub const DEFAULT_GROUP: &str = "default";

/// Default package name of the agent itself.
pub const DEFAULT_SELF_PACKAGE: &str = "org.fleetup.agent";

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// File holding the machine identifier.
const MACHINE_ID_PATH: &str = "/etc/machine-id";

/// Files holding the host name, in lookup order.
const HOSTNAME_PATHS: [&str; 2] = ["/proc/sys/kernel/hostname", "/etc/hostname"];

/// Path of the default configuration file.
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.ini")
}

/// Directory holding the configuration file.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fleetup")
}

/// Default directory for the database, preferences and downloads.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fleetup")
}

// =============================================================================
// Sections
// =============================================================================

/// `[server]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Manifest endpoint; the device id is appended as a path segment.
    pub url: String,
    /// Hosts the agent may contact. Empty means the host of `url`.
    pub allowed_hosts: Vec<String>,
    /// HTTP proxy URL.
    pub proxy: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_SERVER_URL.to_string(),
            allowed_hosts: Vec::new(),
            proxy: None,
            timeout_secs: DEFAULT_SERVER_TIMEOUT_SECS,
        }
    }
}

/// `[device]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSettings {
    /// Explicit device id; derived from the host when unset.
    pub id: Option<String>,
    pub group: String,
    /// Package name of the agent, installed as a self-update.
    pub self_package: String,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            id: None,
            group: DEFAULT_GROUP.to_string(),
            self_package: DEFAULT_SELF_PACKAGE.to_string(),
        }
    }
}

/// `[schedule]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSettings {
    pub frequency_minutes: u64,
    pub min_interval_secs: u64,
    /// Install queued updates right after a check instead of only notifying.
    pub auto_install: bool,
    pub retry_attempts: u32,
    pub retry_delay_secs: u64,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            frequency_minutes: crate::scheduler::DEFAULT_FREQUENCY_MINUTES,
            min_interval_secs: crate::scheduler::DEFAULT_MIN_INTERVAL_SECS,
            auto_install: true,
            retry_attempts: crate::scheduler::DEFAULT_CHECK_ATTEMPTS,
            retry_delay_secs: crate::scheduler::DEFAULT_CHECK_DELAY_SECS,
        }
    }
}

/// `[storage]` section. Unset paths resolve under `data_dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
    pub data_dir: PathBuf,
    pub database: Option<PathBuf>,
    pub preferences: Option<PathBuf>,
    pub scratch_dir: Option<PathBuf>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database: None,
            preferences: None,
            scratch_dir: None,
        }
    }
}

impl StorageSettings {
    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| self.data_dir.join("updater.db"))
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.preferences
            .clone()
            .unwrap_or_else(|| self.data_dir.join("preferences.ini"))
    }

    pub fn scratch_path(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("downloads"))
    }

    /// Where the status board is persisted.
    pub fn status_path(&self) -> PathBuf {
        self.data_dir.join("status.json")
    }

    /// Lock file held while an update pass runs.
    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join("pass.lock")
    }
}

/// `[installer]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallerSettings {
    pub pm_command: String,
    pub install_timeout_secs: u64,
}

impl Default for InstallerSettings {
    fn default() -> Self {
        Self {
            pm_command: crate::device::DEFAULT_PM_COMMAND.to_string(),
            install_timeout_secs: crate::pipeline::DEFAULT_INSTALL_TIMEOUT_SECS,
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    pub level: String,
    /// Directory for daily log files; console only when unset.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            directory: None,
        }
    }
}

// =============================================================================
// Config file
// =============================================================================

/// Parsed configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    pub server: ServerSettings,
    pub device: DeviceSettings,
    pub schedule: ScheduleSettings,
    pub storage: StorageSettings,
    pub installer: InstallerSettings,
    pub logging: LoggingSettings,
}

impl ConfigFile {
    /// Load the default configuration file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_file_path())
    }

    /// Load a configuration file. A missing file yields the defaults.
    ///
    /// Unknown sections and keys are ignored; invalid values are errors.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(config);
        }

        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        for key in ConfigKey::all() {
            if let Some(value) = ini.get_from(Some(key.section()), key.key_name()) {
                key.set(&mut config, value)?;
            }
        }
        Ok(config)
    }

    /// Save to the default configuration file.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&config_file_path())
    }

    /// Save to `path`, creating its directory. Unset values are omitted.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |reason: String| ConfigError::Write {
            path: path.to_path_buf(),
            reason,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| write_err(e.to_string()))?;
        }

        let mut ini = Ini::new();
        for key in ConfigKey::all() {
            let value = key.get(self);
            if !value.is_empty() {
                ini.with_section(Some(key.section()))
                    .set(key.key_name(), value);
            }
        }
        ini.write_to_file(path).map_err(|e| write_err(e.to_string()))
    }

    /// Device identifier: configured, else machine id, else host name.
    pub fn device_id(&self) -> Result<String, ConfigError> {
        let mut sources: Vec<PathBuf> = vec![PathBuf::from(MACHINE_ID_PATH)];
        sources.extend(HOSTNAME_PATHS.iter().map(PathBuf::from));
        resolve_device_id(self.device.id.as_deref(), &sources)
    }
}

/// Pick the configured id, else the first non-empty line of the first
/// readable file in `sources`.
pub fn resolve_device_id(configured: Option<&str>, sources: &[PathBuf]) -> Result<String, ConfigError> {
    if let Some(id) = configured.map(str::trim).filter(|id| !id.is_empty()) {
        return Ok(id.to_string());
    }

    sources
        .iter()
        .filter_map(|path| fs::read_to_string(path).ok())
        .filter_map(|content| {
            content
                .lines()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .map(str::to_string)
        })
        .next()
        .ok_or(ConfigError::NoDeviceId)
}
