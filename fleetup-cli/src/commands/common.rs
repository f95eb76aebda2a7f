//! Output helpers shared across CLI commands.

use console::style;
use fleetup::pipeline::RunSummary;
use fleetup::reconcile::ReconcileReport;
use fleetup::status::StampedMessage;

/// Print what a reconciliation changed.
pub fn print_reconcile(report: &ReconcileReport) {
    if report.flag_changed {
        println!(
            "Managed mode changed; purged {} pending update(s)",
            report.purged
        );
    }
    print_names("Queued", &report.queued);
    print_names("Optional", &report.optional);
    print_names("Now managed", &report.managed);
    print_names("No longer managed", &report.unmanaged);
    print_names("Up to date", &report.current);
    print_names("Skipped", &report.skipped);
    if report.is_quiet() && report.current.is_empty() {
        println!("Nothing to do.");
    }
}

/// Print per-package pipeline outcomes.
pub fn print_run(summary: &RunSummary) {
    if summary.is_empty() {
        println!("No updates to install.");
        return;
    }
    for report in &summary.reports {
        let marker = if report.outcome.is_success() {
            style("ok").green()
        } else if report.outcome.is_failure() {
            style("failed").red()
        } else {
            style("stopped").yellow()
        };
        println!("  [{}] {}: {}", marker, report.package, report.outcome);
    }
    if summary.cancelled {
        println!("Run was interrupted; remaining updates stay queued.");
    }
}

/// Format a stamped message as `time  message`.
pub fn format_stamped(message: &Option<StampedMessage>) -> String {
    match message {
        Some(m) => format!("{}  {}", m.at.format("%Y-%m-%d %H:%M:%S UTC"), m.message),
        None => "(none)".to_string(),
    }
}

fn print_names(label: &str, names: &[String]) {
    if !names.is_empty() {
        println!("{}: {}", label, names.join(", "));
    }
}
