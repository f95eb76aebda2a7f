//! `status` command: print the persisted status board.

use std::sync::Arc;

use console::style;
use fleetup::config::ConfigFile;
use fleetup::preferences::{IniPreferences, SessionFlags};
use fleetup::status::{StatusBoard, VersionState};

use super::common::format_stamped;
use crate::error::CliError;
use crate::GlobalArgs;

/// Print the last recorded status. Does not contact the server.
pub fn run(global: &GlobalArgs, json: bool) -> Result<(), CliError> {
    let config = ConfigFile::load_from(&global.config_path())?;
    let snapshot = StatusBoard::load(&config.storage.status_path()).unwrap_or_default();

    if json {
        let out = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| CliError::Output(e.to_string()))?;
        println!("{}", out);
        return Ok(());
    }

    let prefs = IniPreferences::open(config.storage.preferences_path())?;
    let flags = SessionFlags::new(Arc::new(prefs));

    println!("fleetup v{}", fleetup::VERSION);
    println!("================");
    println!();
    println!("Managed:        {}", if flags.managed() { "yes" } else { "no" });
    if flags.self_update_pending() {
        println!("Self-update:    {}", style("pending").yellow());
    }
    println!("Last check:     {}", format_stamped(&snapshot.last_check));
    println!("Last info:      {}", format_stamped(&snapshot.last_info));
    println!("Last download:  {}", format_stamped(&snapshot.last_download));
    println!("Last error:     {}", format_stamped(&snapshot.last_error));
    if snapshot.retrieval_error.is_some() {
        println!(
            "Retrieval:      {}",
            style(format_stamped(&snapshot.retrieval_error)).red()
        );
    }
    println!();

    if snapshot.packages.is_empty() {
        println!("No managed packages recorded.");
        return Ok(());
    }

    println!("Packages:");
    for info in &snapshot.packages {
        let state = match info.state {
            VersionState::Current | VersionState::Ahead => style(info.state.as_str()).green(),
            VersionState::Behind => style(info.state.as_str()).yellow(),
            _ => style(info.state.as_str()).dim(),
        };
        println!(
            "  {:<40} installed {:>6}  available {:>6}  {}  {}",
            info.name,
            version_label(info.installed_version),
            version_label(info.available_version),
            state,
            info.message
        );
        if let Some(at) = snapshot.installs.get(&info.name) {
            println!("  {:<40} last installed {}", "", at.format("%Y-%m-%d %H:%M:%S UTC"));
        }
    }
    Ok(())
}

fn version_label(version: Option<u32>) -> String {
    version
        .map(|v| v.to_string())
        .unwrap_or_else(|| "-".to_string())
}
