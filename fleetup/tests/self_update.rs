//! Self-update bookkeeping across installs and restarts.
//!
//! Run with: `cargo test --test self_update`

mod common;

use std::thread;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use common::{descriptor, manifest, url_for, TestAgent, SELF_PACKAGE};
use fleetup::pipeline::PackageOutcome;
use fleetup::status::EventKind;
use fleetup::Action;

fn queue_self_update(t: &TestAgent, version: u32) {
    t.device.set_installed(SELF_PACKAGE, version - 1);
    t.server.serve_version(&url_for(SELF_PACKAGE), version, 512);
    t.manifest.set(manifest(
        true,
        vec![descriptor(SELF_PACKAGE, version, Action::Update)],
    ));
}

#[test]
fn test_successful_self_update_clears_flag() {
    let t = TestAgent::new();
    queue_self_update(&t, 9);

    let report = t.agent.run_cycle(&CancellationToken::new()).unwrap();

    assert_eq!(report.run.unwrap().installed(), vec![SELF_PACKAGE]);
    assert!(!t.store().flags().self_update_pending());
    assert!(!t.event_kinds().contains(&EventKind::SelfUpdateFailed));
}

#[test]
fn test_failed_self_update_reports_and_clears_flag() {
    let t = TestAgent::new();
    queue_self_update(&t, 9);
    t.device.reject(SELF_PACKAGE);

    let report = t.agent.run_cycle(&CancellationToken::new()).unwrap();

    assert!(matches!(
        report.run.unwrap().reports[0].outcome,
        PackageOutcome::InstallFailed(_)
    ));
    assert!(!t.store().flags().self_update_pending());
    assert!(t.event_kinds().contains(&EventKind::SelfUpdateFailed));
    assert!(t.store().get_update(SELF_PACKAGE).unwrap().is_some());
}

/// The process dies while the installer replaces it: the flag is still set
/// on the next start and is reported exactly once.
#[test]
fn test_interrupted_self_update_reported_after_restart() {
    let t = TestAgent::new();
    queue_self_update(&t, 9);
    t.device.hang(SELF_PACKAGE);

    let kill = CancellationToken::new();
    let stopper = {
        let kill = kill.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            kill.cancel();
        })
    };
    let report = t.agent.run_cycle(&kill).unwrap();
    stopper.join().unwrap();

    assert!(report.run.unwrap().cancelled);
    assert!(t.store().flags().self_update_pending());

    let t = t.restart();
    assert!(t.agent.recover_self_update().unwrap());
    assert!(t.event_kinds().contains(&EventKind::SelfUpdateFailed));
    assert!(t.agent.status().snapshot().last_error.is_some());

    assert!(!t.agent.recover_self_update().unwrap());
    assert!(!t.store().flags().self_update_pending());
}

#[test]
fn test_recover_without_pending_flag() {
    let t = TestAgent::new();

    assert!(!t.agent.recover_self_update().unwrap());
    assert!(t.event_kinds().is_empty());
}

/// Updates to other packages never touch the flag.
#[test]
fn test_other_packages_leave_flag_alone() {
    let t = TestAgent::new();
    t.server.serve_version(&url_for("a"), 2, 256);
    t.manifest
        .set(manifest(true, vec![descriptor("a", 2, Action::Update)]));
    t.device.hang("a");

    let kill = CancellationToken::new();
    let stopper = {
        let kill = kill.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            kill.cancel();
        })
    };
    t.agent.run_cycle(&kill).unwrap();
    stopper.join().unwrap();

    assert!(!t.store().flags().self_update_pending());
}
