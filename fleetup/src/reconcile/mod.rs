//! Manifest reconciliation.
//!
//! Decides, per package descriptor, whether to ignore it, bring it under
//! management, queue an update, or drop a stale update, then unmanages every
//! managed package the manifest no longer lists.
//!
//! # Decision table
//!
//! ```text
//!                     ┌──────────────────────┬──────────────────────────┐
//!                     │ installed            │ not installed            │
//!  ┌──────────────────┼──────────────────────┼──────────────────────────┤
//!  │ already managed  │ compare versions     │ queue (apply = flag)     │
//!  │ managed flag set │ manage, compare      │ manage, queue            │
//!  │ otherwise        │ drop pending update  │ queue (apply = flag)     │
//!  └──────────────────┴──────────────────────┴──────────────────────────┘
//!
//!  compare: installed < proposed  → queue
//!           installed >= proposed → drop pending update (no downgrade)
//! ```
//!
//! A change of the managed flag purges every pending update before any
//! descriptor is looked at.

mod report;

use std::sync::Arc;

use crate::device::PackageInspector;
use crate::error::{StorageError, UpdaterResult};
use crate::manifest::ManifestResponse;
use crate::package::UpdateRecord;
use crate::status::PackageInfoCache;
use crate::store::PackageStore;

pub use report::ReconcileReport;

/// Applies manifests to the package store.
pub struct Reconciler {
    store: Arc<PackageStore>,
    inspector: Arc<dyn PackageInspector>,
    cache: Arc<PackageInfoCache>,
}

impl Reconciler {
    pub fn new(
        store: Arc<PackageStore>,
        inspector: Arc<dyn PackageInspector>,
        cache: Arc<PackageInfoCache>,
    ) -> Self {
        Self {
            store,
            inspector,
            cache,
        }
    }

    /// Reconcile the store against a validated manifest.
    ///
    /// Failing to purge or persist the managed flag aborts the call. Store or
    /// package manager failures on a single descriptor skip that descriptor.
    pub fn reconcile(&self, manifest: &ManifestResponse) -> Result<ReconcileReport, StorageError> {
        let mut report = ReconcileReport::default();
        let flags = self.store.flags();

        if flags.managed() != manifest.managed {
            report.flag_changed = true;
            report.purged = self.store.remove_all_updates()?;
            flags.set_managed(manifest.managed)?;
            tracing::info!(
                managed = manifest.managed,
                purged = report.purged,
                "Managed flag changed, purged pending updates"
            );
        }

        for record in &manifest.packages {
            if let Err(e) = self.apply_descriptor(record, manifest.managed, &mut report) {
                tracing::warn!(
                    package = %record.qualified_name,
                    error = %e,
                    "Skipping package descriptor"
                );
                report.skipped.push(record.qualified_name.clone());
            }
        }

        self.unmanage_missing(manifest, &mut report)?;

        tracing::info!(
            queued = report.queued.len(),
            optional = report.optional.len(),
            unmanaged = report.unmanaged.len(),
            skipped = report.skipped.len(),
            "Reconciliation complete"
        );
        Ok(report)
    }

    fn apply_descriptor(
        &self,
        record: &UpdateRecord,
        managed_flag: bool,
        report: &mut ReconcileReport,
    ) -> UpdaterResult<()> {
        let name = record.qualified_name.as_str();
        let installed = self.inspector.installed_version(name)?;
        self.cache.observe(&record.package, Some(record.version), installed);

        match installed {
            Some(installed) => {
                if !self.store.is_managed(name)? {
                    if !managed_flag {
                        self.drop_update(name)?;
                        return Ok(());
                    }
                    self.manage(record, report)?;
                }
                if installed < record.version {
                    Ok(self.queue(record, report)?)
                } else {
                    tracing::debug!(
                        package = name,
                        installed,
                        proposed = record.version,
                        "Installed version is current"
                    );
                    if self.drop_update(name)? {
                        report.current.push(name.to_string());
                    }
                    Ok(())
                }
            }
            None => {
                if managed_flag && !self.store.is_managed(name)? {
                    self.manage(record, report)?;
                }
                Ok(self.queue(record, report)?)
            }
        }
    }

    fn manage(&self, record: &UpdateRecord, report: &mut ReconcileReport) -> Result<(), StorageError> {
        self.store
            .add_managed(&record.qualified_name, &record.display_name)?;
        report.managed.push(record.qualified_name.clone());
        Ok(())
    }

    fn queue(&self, record: &UpdateRecord, report: &mut ReconcileReport) -> Result<(), StorageError> {
        self.store.add_update(record)?;
        if self.store.flags().managed() {
            report.queued.push(record.qualified_name.clone());
        } else {
            report.optional.push(record.qualified_name.clone());
        }
        Ok(())
    }

    fn drop_update(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.store.remove_update(name)? > 0)
    }

    /// Unmanage managed packages the manifest does not mention.
    fn unmanage_missing(
        &self,
        manifest: &ManifestResponse,
        report: &mut ReconcileReport,
    ) -> Result<(), StorageError> {
        for package in self.store.list_managed()? {
            let name = package.qualified_name.as_str();
            if manifest.mentions(name) {
                continue;
            }
            self.store.stop_managing(name)?;
            self.store.remove_update(name)?;
            tracing::info!(package = name, "Package dropped from manifest, unmanaged");
            report.unmanaged.push(name.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InstallError;
    use crate::package::{Action, PackageRef};
    use crate::store::test_support::memory_store;
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeInspector {
        installed: Mutex<HashMap<String, u32>>,
        failing: Vec<String>,
    }

    impl FakeInspector {
        fn with(entries: &[(&str, u32)]) -> Self {
            Self {
                installed: Mutex::new(
                    entries.iter().map(|(n, v)| (n.to_string(), *v)).collect(),
                ),
                failing: Vec::new(),
            }
        }

        fn failing_on(mut self, name: &str) -> Self {
            self.failing.push(name.to_string());
            self
        }
    }

    impl PackageInspector for FakeInspector {
        fn installed_version(&self, name: &str) -> Result<Option<u32>, InstallError> {
            if self.failing.iter().any(|n| n == name) {
                return Err(InstallError::Query {
                    package: name.to_string(),
                    reason: "exit status: 1".to_string(),
                });
            }
            Ok(self.installed.lock().get(name).copied())
        }
    }

    fn descriptor(name: &str, version: u32) -> UpdateRecord {
        UpdateRecord::new(
            PackageRef::new(name, name.to_uppercase()),
            format!("{}.0", version),
            version,
            format!("https://updates.example.org/{}.pkg", name),
            Action::Update,
        )
        .unwrap()
    }

    fn manifest(managed: bool, packages: Vec<UpdateRecord>) -> ManifestResponse {
        ManifestResponse {
            managed,
            packages,
            rejected: Vec::new(),
        }
    }

    fn reconciler(store: PackageStore, inspector: FakeInspector) -> (Reconciler, Arc<PackageStore>) {
        let store = Arc::new(store);
        let r = Reconciler::new(
            store.clone(),
            Arc::new(inspector),
            Arc::new(PackageInfoCache::new()),
        );
        (r, store)
    }

    #[test]
    fn test_managed_installed_behind_is_queued() {
        let (r, store) = reconciler(memory_store(true), FakeInspector::with(&[("a", 1)]));
        store.add_managed("a", "A").unwrap();

        let report = r.reconcile(&manifest(true, vec![descriptor("a", 2)])).unwrap();

        assert_eq!(report.queued, vec!["a"]);
        assert!(report.has_actionable());
        let update = store.get_update("a").unwrap().unwrap();
        assert_eq!(update.version, 2);
        assert!(update.apply);
    }

    #[test]
    fn test_installed_equal_or_ahead_drops_update() {
        let (r, store) = reconciler(
            memory_store(true),
            FakeInspector::with(&[("a", 2), ("b", 5)]),
        );
        store.add_managed("a", "A").unwrap();
        store.add_managed("b", "B").unwrap();
        store.add_update(&descriptor("a", 2)).unwrap();
        store.add_update(&descriptor("b", 3)).unwrap();

        let report = r
            .reconcile(&manifest(true, vec![descriptor("a", 2), descriptor("b", 3)]))
            .unwrap();

        assert!(store.get_updates().unwrap().is_empty());
        assert_eq!(report.current, vec!["a", "b"]);
        assert!(!report.has_actionable());
    }

    #[test]
    fn test_installed_unmanaged_is_promoted_when_flag_set() {
        let (r, store) = reconciler(memory_store(true), FakeInspector::with(&[("a", 1)]));

        let report = r.reconcile(&manifest(true, vec![descriptor("a", 3)])).unwrap();

        assert_eq!(report.managed, vec!["a"]);
        assert!(store.is_managed("a").unwrap());
        assert!(store.get_update("a").unwrap().is_some());
    }

    #[test]
    fn test_installed_unmanaged_is_ignored_without_flag() {
        let (r, store) = reconciler(memory_store(false), FakeInspector::with(&[("a", 1)]));
        store.add_update(&descriptor("a", 2)).unwrap();

        let report = r.reconcile(&manifest(false, vec![descriptor("a", 3)])).unwrap();

        assert!(!store.is_managed("a").unwrap());
        assert!(store.get_update("a").unwrap().is_none());
        assert!(report.queued.is_empty());
    }

    #[test]
    fn test_not_installed_managed_flag_manages_and_queues() {
        let (r, store) = reconciler(memory_store(true), FakeInspector::default());

        let report = r.reconcile(&manifest(true, vec![descriptor("a", 1)])).unwrap();

        assert!(store.is_managed("a").unwrap());
        assert_eq!(report.queued, vec!["a"]);
        assert!(store.get_apply("a").unwrap().unwrap());
    }

    #[test]
    fn test_not_installed_unmanaged_is_optional() {
        let (r, store) = reconciler(memory_store(false), FakeInspector::default());

        let report = r.reconcile(&manifest(false, vec![descriptor("a", 1)])).unwrap();

        assert!(!store.is_managed("a").unwrap());
        assert_eq!(report.optional, vec!["a"]);
        assert_eq!(store.get_apply("a").unwrap(), Some(false));
        assert!(!report.has_actionable());
    }

    #[test]
    fn test_flag_change_purges_before_processing() {
        let (r, store) = reconciler(memory_store(false), FakeInspector::with(&[("x", 1)]));
        store.add_update(&descriptor("stale", 4)).unwrap();

        let report = r.reconcile(&manifest(true, vec![descriptor("a", 1)])).unwrap();

        assert!(report.flag_changed);
        assert_eq!(report.purged, 1);
        assert!(store.flags().managed());
        let names: Vec<String> = store
            .get_updates()
            .unwrap()
            .into_iter()
            .map(|u| u.qualified_name.clone())
            .collect();
        assert_eq!(names, vec!["a"]);
    }

    #[test]
    fn test_unchanged_flag_does_not_purge() {
        let (r, store) = reconciler(memory_store(true), FakeInspector::default());
        store.add_update(&descriptor("other", 4)).unwrap();

        let report = r.reconcile(&manifest(true, vec![])).unwrap();

        assert!(!report.flag_changed);
        assert!(store.get_update("other").unwrap().is_some());
    }

    #[test]
    fn test_missing_managed_package_is_unmanaged() {
        let (r, store) = reconciler(memory_store(true), FakeInspector::with(&[("c", 1)]));
        store.add_managed("c", "C").unwrap();
        store.add_update(&descriptor("c", 2)).unwrap();

        let report = r.reconcile(&manifest(true, vec![descriptor("a", 1)])).unwrap();

        assert_eq!(report.unmanaged, vec!["c"]);
        assert!(!store.is_managed("c").unwrap());
        assert!(store.is_pending_removal("c").unwrap());
        assert!(store.get_update("c").unwrap().is_none());
    }

    #[test]
    fn test_rejected_descriptor_keeps_package_managed() {
        let (r, store) = reconciler(memory_store(true), FakeInspector::with(&[("c", 1)]));
        store.add_managed("c", "C").unwrap();

        let mut m = manifest(true, vec![]);
        m.rejected.push("c".to_string());
        let report = r.reconcile(&m).unwrap();

        assert!(report.unmanaged.is_empty());
        assert!(store.is_managed("c").unwrap());
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let (r, store) = reconciler(
            memory_store(true),
            FakeInspector::with(&[("a", 1), ("b", 3)]),
        );
        let m = manifest(
            true,
            vec![descriptor("a", 2), descriptor("b", 3), descriptor("c", 1)],
        );

        r.reconcile(&m).unwrap();
        let first = (store.get_updates().unwrap(), store.list_managed().unwrap());
        r.reconcile(&m).unwrap();
        let second = (store.get_updates().unwrap(), store.list_managed().unwrap());

        assert_eq!(first, second);
    }

    #[test]
    fn test_failed_query_skips_descriptor() {
        let (r, store) = reconciler(
            memory_store(true),
            FakeInspector::with(&[("b", 1)]).failing_on("a"),
        );

        let report = r
            .reconcile(&manifest(true, vec![descriptor("a", 2), descriptor("b", 2)]))
            .unwrap();

        assert_eq!(report.skipped, vec!["a"]);
        assert_eq!(report.queued, vec!["b"]);
        assert!(store.get_update("a").unwrap().is_none());
        assert!(!store.is_managed("a").unwrap());
    }

    #[test]
    fn test_observations_feed_cache() {
        let cache = Arc::new(PackageInfoCache::new());
        let store = Arc::new(memory_store(true));
        let r = Reconciler::new(
            store,
            Arc::new(FakeInspector::with(&[("a", 1)])),
            cache.clone(),
        );

        r.reconcile(&manifest(true, vec![descriptor("a", 2)])).unwrap();

        let info = cache.get("a").unwrap();
        assert_eq!(info.available_version, Some(2));
        assert_eq!(info.installed_version, Some(1));
    }

    proptest! {
        #[test]
        fn test_version_tie_break(
            installed in proptest::option::of(0u32..50),
            proposed in 0u32..50,
            managed in any::<bool>(),
        ) {
            let inspector = match installed {
                Some(v) => FakeInspector::with(&[("a", v)]),
                None => FakeInspector::default(),
            };
            let (r, store) = reconciler(memory_store(managed), inspector);
            store.add_managed("a", "A").unwrap();

            r.reconcile(&manifest(managed, vec![descriptor("a", proposed)])).unwrap();

            let update = store.get_update("a").unwrap();
            match installed {
                Some(v) if v >= proposed => prop_assert!(update.is_none()),
                _ => {
                    let update = update.unwrap();
                    prop_assert_eq!(update.version, proposed);
                    prop_assert_eq!(update.apply, managed);
                }
            }
        }
    }
}
