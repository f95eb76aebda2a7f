//! Commands over the package store: managed packages, pending updates and
//! pending removals.

use clap::{Subcommand, ValueEnum};
use fleetup::device::PackageInspector;

use crate::error::CliError;
use crate::runner::CliRunner;
use crate::GlobalArgs;

/// Managed package subcommands.
#[derive(Debug, Subcommand)]
pub enum ManagedCommands {
    /// List managed packages with their installed versions
    List,

    /// Stop managing a package and drop its pending update
    Stop {
        /// Qualified package name
        name: String,
    },
}

/// Pending update subcommands.
#[derive(Debug, Subcommand)]
pub enum UpdatesCommands {
    /// List pending updates
    List,

    /// Mark a pending update for installation, or clear the mark
    Apply {
        /// Qualified package name
        name: String,

        /// Whether the pipeline should install it
        #[arg(value_enum, default_value_t = Switch::On)]
        state: Switch,
    },
}

/// Pending removal subcommands.
#[derive(Debug, Subcommand)]
pub enum RemovalsCommands {
    /// List packages waiting to be uninstalled
    List,

    /// Acknowledge a removal without waiting for the package to disappear
    Ack {
        /// Qualified package name
        name: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Switch {
    On,
    Off,
}

/// Run a managed subcommand.
pub fn run_managed(global: &GlobalArgs, command: ManagedCommands) -> Result<(), CliError> {
    let runner = CliRunner::new(global)?;
    let agent = runner.create_agent()?;
    let store = agent.store();

    match command {
        ManagedCommands::List => {
            let managed = store.list_managed()?;
            if managed.is_empty() {
                println!("No managed packages.");
                return Ok(());
            }
            let inspector = &agent.context().inspector;
            for package in managed {
                let installed = match inspector.installed_version(&package.qualified_name) {
                    Ok(Some(version)) => version.to_string(),
                    Ok(None) => "not installed".to_string(),
                    Err(_) => "unknown (query failed)".to_string(),
                };
                println!(
                    "  {:<40} {:<24} {}",
                    package.qualified_name, package.display_name, installed
                );
            }
            Ok(())
        }
        ManagedCommands::Stop { name } => {
            if !store.stop_managing(&name)? {
                return Err(CliError::NotFound(name));
            }
            store.remove_update(&name)?;
            println!("No longer managing {}", name);
            Ok(())
        }
    }
}

/// Run an updates subcommand.
pub fn run_updates(global: &GlobalArgs, command: UpdatesCommands) -> Result<(), CliError> {
    let runner = CliRunner::new(global)?;
    let agent = runner.create_agent()?;
    let store = agent.store();

    match command {
        UpdatesCommands::List => {
            let updates = store.get_updates()?;
            if updates.is_empty() {
                println!("No pending updates.");
                return Ok(());
            }
            for update in updates {
                println!(
                    "  {:<40} {:>6} ({})  {:<6} {}",
                    update.qualified_name,
                    update.version,
                    update.release,
                    update.action,
                    if update.apply { "apply" } else { "optional" }
                );
            }
            Ok(())
        }
        UpdatesCommands::Apply { name, state } => {
            let apply = state == Switch::On;
            if !store.set_apply(&name, apply)? {
                return Err(CliError::NotFound(name));
            }
            println!(
                "{} will {}be installed on the next run",
                name,
                if apply { "" } else { "not " }
            );
            Ok(())
        }
    }
}

/// Run a removals subcommand.
pub fn run_removals(global: &GlobalArgs, command: RemovalsCommands) -> Result<(), CliError> {
    let runner = CliRunner::new(global)?;
    let agent = runner.create_agent()?;

    match command {
        RemovalsCommands::List => {
            let removals = agent.store().list_pending_removals()?;
            if removals.is_empty() {
                println!("No pending removals.");
            }
            for name in removals {
                println!("  {}", name);
            }
            Ok(())
        }
        RemovalsCommands::Ack { name } => {
            if !agent.acknowledge_removal(&name)? {
                return Err(CliError::NotFound(name));
            }
            println!("Acknowledged removal of {}", name);
            Ok(())
        }
    }
}
