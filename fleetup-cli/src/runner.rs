//! Shared setup for commands that run the agent.

use std::path::PathBuf;
use std::sync::Arc;

use fleetup::config::ConfigFile;
use fleetup::logging::{init_logging, LoggingConfig, WorkerGuard};
use fleetup::status::LogSink;
use fleetup::Agent;
use tokio_util::sync::CancellationToken;

use crate::error::CliError;
use crate::GlobalArgs;

/// Loads configuration, installs logging and builds the agent.
pub struct CliRunner {
    config: ConfigFile,
    config_path: PathBuf,
    _log_guard: Option<WorkerGuard>,
}

impl CliRunner {
    pub fn new(global: &GlobalArgs) -> Result<Self, CliError> {
        let config_path = global.config_path();
        let config = ConfigFile::load_from(&config_path)?;

        let mut logging = LoggingConfig::from(&config.logging);
        if global.verbose {
            logging.level = "debug".to_string();
        }
        let guard = init_logging(&logging)?;

        Ok(Self {
            config,
            config_path,
            _log_guard: guard,
        })
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    /// Log the command being run and where state lives.
    pub fn log_startup(&self, command: &str) {
        tracing::info!(
            version = fleetup::VERSION,
            command,
            config = %self.config_path.display(),
            data_dir = %self.config.storage.data_dir.display(),
            "fleetup starting"
        );
    }

    /// Build the agent with events going to the log.
    pub fn create_agent(&self) -> Result<Agent, CliError> {
        Ok(Agent::from_config(&self.config, Arc::new(LogSink))?)
    }

    /// Token cancelled on Ctrl+C.
    pub fn install_interrupt_handler(&self) -> Result<CancellationToken, CliError> {
        let kill = CancellationToken::new();
        let handler_kill = kill.clone();
        ctrlc::set_handler(move || {
            println!();
            println!("Received shutdown signal, stopping...");
            handler_kill.cancel();
        })
        .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;
        Ok(kill)
    }
}
