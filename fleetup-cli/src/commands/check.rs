//! `check` and `install` commands: one-off update passes.

use fleetup::scheduler::Trigger;
use fleetup::TriggerOutcome;

use super::common::{print_reconcile, print_run};
use crate::error::CliError;
use crate::runner::CliRunner;
use crate::GlobalArgs;

/// Check the server now. Installs when the device is managed and
/// auto-install is on, unless `no_install` is set.
pub fn run_check(global: &GlobalArgs, no_install: bool) -> Result<(), CliError> {
    let runner = CliRunner::new(global)?;
    runner.log_startup("check");
    let agent = runner.create_agent()?;
    let kill = runner.install_interrupt_handler()?;

    if agent.recover_self_update()? {
        println!("The previous self-update did not complete.");
    }

    if no_install {
        let report = agent.check_for_updates(&kill)?;
        let cleared = agent.sweep_removals()?;
        print_reconcile(&report);
        if !cleared.is_empty() {
            println!("Removals confirmed: {}", cleared.join(", "));
        }
        return Ok(());
    }

    match agent.handle_trigger(Trigger::Manual, &kill)? {
        TriggerOutcome::Ran(report) => {
            print_reconcile(&report.reconcile);
            if !report.removals_cleared.is_empty() {
                println!("Removals confirmed: {}", report.removals_cleared.join(", "));
            }
            match &report.run {
                Some(summary) => print_run(summary),
                None if report.reconcile.has_actionable() || !report.reconcile.optional.is_empty() => {
                    println!("Updates are available; run 'fleetup install' to apply them.");
                }
                None => {}
            }
        }
        TriggerOutcome::Skipped => {
            println!("A check ran recently or is running in another process; skipped.")
        }
        TriggerOutcome::TimerScheduled(_) => {}
    }
    Ok(())
}

/// Install queued updates flagged for apply.
pub fn run_install(global: &GlobalArgs) -> Result<(), CliError> {
    let runner = CliRunner::new(global)?;
    runner.log_startup("install");
    let agent = runner.create_agent()?;
    let kill = runner.install_interrupt_handler()?;

    let summary = agent.install_updates(&kill)?;
    print_run(&summary);
    if summary.cancelled {
        return Err(CliError::Interrupted);
    }
    Ok(())
}
