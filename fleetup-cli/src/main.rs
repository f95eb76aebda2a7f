//! fleetup CLI - Command-line interface
//!
//! Runs the update agent as a daemon, triggers one-off passes, and inspects
//! or edits the agent's local state.

mod commands;
mod error;
mod runner;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use commands::config::ConfigCommands;
use commands::queue::{ManagedCommands, RemovalsCommands, UpdatesCommands};

#[derive(Debug, Parser)]
#[command(name = "fleetup", version, about = "Auto-update agent for managed devices")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command.
#[derive(Debug, Clone, clap::Args)]
pub struct GlobalArgs {
    /// Configuration file (defaults to the per-user config.ini)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl GlobalArgs {
    /// Configuration file in effect.
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(fleetup::config::config_file_path)
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Check for updates now and install them when allowed
    Check {
        /// Only reconcile; do not start the install pipeline
        #[arg(long)]
        no_install: bool,
    },

    /// Install queued updates without checking the server
    Install,

    /// Show the last recorded agent status
    Status {
        /// Print the raw status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect or edit managed packages
    #[command(subcommand)]
    Managed(ManagedCommands),

    /// Inspect or edit pending updates
    #[command(subcommand)]
    Updates(UpdatesCommands),

    /// Inspect or acknowledge pending removals
    #[command(subcommand)]
    Removals(RemovalsCommands),

    /// Show or change the poll frequency
    Frequency {
        /// New frequency in minutes
        minutes: Option<u64>,
    },

    /// View or modify configuration
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Run the agent until interrupted
    Daemon,
}

fn main() {
    let cli = Cli::parse();
    let global = cli.global;

    let result = match cli.command {
        Commands::Check { no_install } => commands::check::run_check(&global, no_install),
        Commands::Install => commands::check::run_install(&global),
        Commands::Status { json } => commands::status::run(&global, json),
        Commands::Managed(command) => commands::queue::run_managed(&global, command),
        Commands::Updates(command) => commands::queue::run_updates(&global, command),
        Commands::Removals(command) => commands::queue::run_removals(&global, command),
        Commands::Frequency { minutes } => commands::frequency::run(&global, minutes),
        Commands::Config(command) => commands::config::run(&global, command),
        Commands::Daemon => commands::daemon::run(&global),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(e.exit_code());
    }
}
