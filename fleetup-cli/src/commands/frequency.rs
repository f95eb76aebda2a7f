//! `frequency` command: show or override the poll frequency.

use crate::error::CliError;
use crate::runner::CliRunner;
use crate::GlobalArgs;

/// Print the poll frequency, or persist a new one.
///
/// A running daemon picks the new value up when it next starts.
pub fn run(global: &GlobalArgs, minutes: Option<u64>) -> Result<(), CliError> {
    let runner = CliRunner::new(global)?;
    let agent = runner.create_agent()?;

    match minutes {
        Some(0) => Err(CliError::Config(
            "Frequency must be at least one minute".to_string(),
        )),
        Some(minutes) => {
            agent.set_poll_frequency(minutes)?;
            println!("Poll frequency set to {} minute(s)", minutes);
            Ok(())
        }
        None => {
            let period = agent.scheduler().frequency();
            println!("Poll frequency: {} minute(s)", period.as_secs() / 60);
            Ok(())
        }
    }
}
