//! `daemon` command: run the agent on its timer until interrupted.
//!
//! ```text
//!  Boot ──▶ TimerScheduled(period)
//!             │
//!             ▼
//!  every period: spawn worker ──▶ handle_trigger(Timer)
//!                                   │  throttled / busy: skipped
//!                                   ▼
//!                                run_cycle
//! ```
//!
//! Ctrl+C cancels the shared token; the running pass stops at its next
//! checkpoint and the loop joins outstanding workers before exiting.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use fleetup::scheduler::Trigger;
use fleetup::{Agent, TriggerOutcome};
use tokio_util::sync::CancellationToken;

use super::common::print_run;
use crate::error::CliError;
use crate::runner::CliRunner;
use crate::GlobalArgs;

const TICK: Duration = Duration::from_millis(100);

/// Run the daemon loop.
pub fn run(global: &GlobalArgs) -> Result<(), CliError> {
    let runner = CliRunner::new(global)?;
    runner.log_startup("daemon");
    let agent = Arc::new(runner.create_agent()?);
    let kill = runner.install_interrupt_handler()?;

    agent.recover_self_update()?;

    let period = match agent.handle_trigger(Trigger::Boot, &kill)? {
        TriggerOutcome::TimerScheduled(period) => period,
        _ => agent.scheduler().frequency(),
    };

    println!("fleetup agent v{}", fleetup::VERSION);
    println!("==================");
    println!();
    println!("Device:    {}", agent.config().device_id);
    println!("Server:    {}", runner.config().server.url);
    println!("Frequency: {} minute(s)", period.as_secs() / 60);
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let mut workers: Vec<JoinHandle<()>> = Vec::new();
    let mut next_tick = Instant::now();

    while !kill.is_cancelled() {
        let now = Instant::now();
        if now >= next_tick {
            workers.retain(|w| !w.is_finished());
            let worker_agent = Arc::clone(&agent);
            let worker_kill = kill.clone();
            workers.push(thread::spawn(move || timer_pass(&worker_agent, &worker_kill)));
            next_tick = now + period;
        }
        thread::sleep(TICK);
    }

    for worker in workers {
        let _ = worker.join();
    }
    tracing::info!("Agent stopped");
    Ok(())
}

/// One timer-driven pass on a worker thread.
fn timer_pass(agent: &Agent, kill: &CancellationToken) {
    match agent.handle_trigger(Trigger::Timer, kill) {
        Ok(TriggerOutcome::Ran(report)) => {
            tracing::info!(
                queued = report.reconcile.queued.len(),
                optional = report.reconcile.optional.len(),
                removals_cleared = report.removals_cleared.len(),
                "Update pass complete"
            );
            if let Some(summary) = &report.run {
                print_run(summary);
            }
        }
        Ok(TriggerOutcome::Skipped) => tracing::debug!("Timer tick skipped"),
        Ok(TriggerOutcome::TimerScheduled(_)) => {}
        Err(e) if e.is_cancelled() => tracing::info!("Update pass cancelled"),
        Err(e) => tracing::error!(error = %e, "Update pass failed"),
    }
}
