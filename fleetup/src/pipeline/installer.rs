//! Installer pipeline for queued updates.
//!
//! Works through the apply-flagged pending updates one at a time:
//! 1. Download the artifact (resumable)
//! 2. For `CLEAN` updates of installed packages, uninstall and wait
//! 3. Install and wait for the installer's report
//! 4. Verify the installed version and remove the pending update
//!
//! When the list is exhausted the package info cache is refreshed.

use std::cell::Cell;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use super::download::ResumableDownloader;
use super::state::{PackageOutcome, PackageStage, RunSummary};
use crate::device::{CompletionCallback, PackageInspector, PrivilegedInstaller};
use crate::error::{InstallError, StorageError};
use crate::package::{Action, UpdateRecord};
use crate::status::{EventKind, EventSink, PackageInfoCache, StatusBoard};
use crate::store::PackageStore;

/// Default time to wait for the installer to report, in seconds.
pub const DEFAULT_INSTALL_TIMEOUT_SECS: u64 = 600;

/// How often a blocked wait re-checks the kill flag.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Minimum time between download progress updates on the status board.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Shared collaborators of the pipeline and the agent.
#[derive(Clone)]
pub struct PipelineContext {
    pub store: Arc<PackageStore>,
    pub inspector: Arc<dyn PackageInspector>,
    pub installer: Arc<dyn PrivilegedInstaller>,
    pub downloader: Arc<ResumableDownloader>,
    pub status: Arc<StatusBoard>,
    pub cache: Arc<PackageInfoCache>,
    pub sink: Arc<dyn EventSink>,
}

impl PipelineContext {
    /// Re-read installed versions of managed packages and publish them.
    pub fn refresh_package_info(&self) {
        match self.store.list_managed() {
            Ok(managed) => self.cache.refresh(&managed, self.inspector.as_ref()),
            Err(e) => tracing::warn!(error = %e, "Failed to list managed packages for refresh"),
        }
        self.status
            .set_packages(self.cache.entries(), self.cache.retrieval_error());
        self.sink
            .notify(EventKind::CacheRefreshed, "Package information refreshed");
    }
}

/// Why waiting on the installer ended without success.
enum WaitError {
    Cancelled,
    Failed(InstallError),
}

/// Sequential download/install state machine.
pub struct InstallPipeline {
    ctx: PipelineContext,
    self_package: String,
    install_timeout: Duration,
    poll_interval: Duration,
}

impl InstallPipeline {
    /// Create a pipeline. `self_package` is the agent's own package name.
    pub fn new(ctx: PipelineContext, self_package: impl Into<String>) -> Self {
        Self {
            ctx,
            self_package: self_package.into(),
            install_timeout: Duration::from_secs(DEFAULT_INSTALL_TIMEOUT_SECS),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set how long to wait for each installer report.
    pub fn with_install_timeout(mut self, timeout: Duration) -> Self {
        self.install_timeout = timeout;
        self
    }

    /// Set how often blocked waits re-check the kill flag.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Process every pending update with `apply` set.
    ///
    /// Per-package failures are recorded and the run moves on. Only a failure
    /// to read the queue is returned as an error.
    pub fn run(&self, kill: &CancellationToken) -> Result<RunSummary, StorageError> {
        let updates: Vec<UpdateRecord> = self
            .ctx
            .store
            .get_updates()?
            .into_iter()
            .filter(|u| u.apply)
            .collect();

        let mut summary = RunSummary::default();
        if updates.is_empty() {
            tracing::debug!("No updates to apply");
            return Ok(summary);
        }

        tracing::info!(count = updates.len(), "Starting install run");

        for record in &updates {
            if kill.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let outcome = self.process(record, kill);
            self.report(record, &outcome);
            summary.record(record.qualified_name.clone(), outcome);

            if summary.cancelled {
                break;
            }
        }

        if summary.cancelled {
            self.ctx
                .sink
                .notify(EventKind::RunCancelled, "Install run cancelled");
        } else {
            self.ctx.refresh_package_info();
        }

        tracing::info!(
            installed = summary.installed().len(),
            failed = summary.failures().len(),
            cancelled = summary.cancelled,
            "Install run finished"
        );
        Ok(summary)
    }

    fn process(&self, record: &UpdateRecord, kill: &CancellationToken) -> PackageOutcome {
        let name = record.qualified_name.as_str();

        tracing::info!(package = name, stage = %PackageStage::Downloading, version = record.version);
        let artifact = match self.download(record, kill) {
            Ok(path) => path,
            Err(e) if e.is_cancelled() => return PackageOutcome::Cancelled,
            Err(e) => return PackageOutcome::DownloadFailed(e.to_string()),
        };

        if kill.is_cancelled() {
            return PackageOutcome::Cancelled;
        }

        let needs_uninstall = match record.action {
            Action::Clean => match self.ctx.inspector.is_installed(name) {
                Ok(installed) => installed,
                Err(e) => {
                    self.ctx.downloader.discard(name);
                    return PackageOutcome::UninstallFailed(e.to_string());
                }
            },
            Action::Update => false,
        };

        if needs_uninstall {
            tracing::info!(package = name, stage = %PackageStage::Uninstalling);
            match self.wait_for(name, kill, |done| {
                self.ctx.installer.uninstall(name, done)
            }) {
                Ok(()) => self
                    .ctx
                    .sink
                    .notify(EventKind::Uninstalled, &format!("Uninstalled {}", record.package)),
                Err(WaitError::Cancelled) => return PackageOutcome::Cancelled,
                Err(WaitError::Failed(e)) => {
                    self.ctx.downloader.discard(name);
                    return PackageOutcome::UninstallFailed(e.to_string());
                }
            }
        }

        let self_update = record.is(&self.self_package);
        if self_update {
            if let Err(e) = self.ctx.store.flags().set_self_update_pending(true) {
                return PackageOutcome::InstallFailed(format!(
                    "failed to persist self-update flag: {}",
                    e
                ));
            }
            tracing::info!(package = name, "Installing agent update");
        }

        tracing::info!(package = name, stage = %PackageStage::Installing);
        let installed = self.wait_for(name, kill, |done| {
            self.ctx.installer.install(name, &artifact, done)
        });
        if let Err(WaitError::Cancelled) = installed {
            // The install continues out-of-band; the self-update flag stays
            // set so the next start can account for it.
            return PackageOutcome::Cancelled;
        }

        self.ctx.downloader.discard(name);
        if self_update {
            if let Err(e) = self.ctx.store.flags().set_self_update_pending(false) {
                tracing::warn!(error = %e, "Failed to clear self-update flag");
            }
        }
        if let Err(WaitError::Failed(e)) = installed {
            return PackageOutcome::InstallFailed(e.to_string());
        }

        tracing::info!(package = name, stage = %PackageStage::Verifying);
        self.verify(record)
    }

    fn download(
        &self,
        record: &UpdateRecord,
        kill: &CancellationToken,
    ) -> Result<std::path::PathBuf, crate::error::TransferError> {
        let last_report = Cell::new(Instant::now());
        let progress = |done: u64, total: u64| {
            if done < total && last_report.get().elapsed() < PROGRESS_INTERVAL {
                return;
            }
            last_report.set(Instant::now());
            tracing::debug!(package = %record.qualified_name, done, total, "Download progress");
            self.ctx.status.record_download(format!(
                "{}: {} of {} bytes",
                record.qualified_name, done, total
            ));
        };
        self.ctx.downloader.download(record, kill, &progress)
    }

    /// Start an installer operation and block until it reports.
    fn wait_for(
        &self,
        package: &str,
        kill: &CancellationToken,
        start: impl FnOnce(CompletionCallback) -> Result<(), InstallError>,
    ) -> Result<(), WaitError> {
        let (tx, rx) = mpsc::channel();
        start(Box::new(move |report| {
            let _ = tx.send(report);
        }))
        .map_err(WaitError::Failed)?;

        let deadline = Instant::now() + self.install_timeout;
        loop {
            if kill.is_cancelled() {
                tracing::info!(package, "Leaving installer operation to finish on its own");
                return Err(WaitError::Cancelled);
            }
            match rx.recv_timeout(self.poll_interval) {
                Ok(report) => return report.into_result().map_err(WaitError::Failed),
                Err(RecvTimeoutError::Timeout) if Instant::now() >= deadline => {
                    return Err(WaitError::Failed(InstallError::Timeout {
                        package: package.to_string(),
                        secs: self.install_timeout.as_secs(),
                    }))
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(WaitError::Failed(InstallError::NoReport(
                        package.to_string(),
                    )))
                }
            }
        }
    }

    /// Confirm the installed version and clear the pending update.
    fn verify(&self, record: &UpdateRecord) -> PackageOutcome {
        let name = record.qualified_name.as_str();
        let actual = match self.ctx.inspector.installed_version(name) {
            Ok(actual) => actual,
            Err(e) => return PackageOutcome::VerificationFailed(e.to_string()),
        };
        if actual != Some(record.version) {
            let err = InstallError::VerificationFailed {
                package: name.to_string(),
                expected: record.version,
                actual,
            };
            return PackageOutcome::VerificationFailed(err.to_string());
        }

        if let Err(e) = self.ctx.store.remove_update(name) {
            return PackageOutcome::InstallFailed(format!(
                "installed but failed to clear pending update: {}",
                e
            ));
        }
        PackageOutcome::Installed {
            version: record.version,
        }
    }

    /// Publish a package outcome to the status board and event sink.
    fn report(&self, record: &UpdateRecord, outcome: &PackageOutcome) {
        let status = &self.ctx.status;
        let sink = &self.ctx.sink;
        let package = &record.package;

        match outcome {
            PackageOutcome::Installed { version } => {
                let message = format!("Installed {} version {}", package, version);
                tracing::info!(package = %package.qualified_name, version, "Package installed");
                status.record_install(&package.qualified_name);
                status.record_info(&message);
                sink.notify(EventKind::Installed, &message);
            }
            PackageOutcome::DownloadFailed(reason) => {
                let message = format!("Download of {} failed: {}", package, reason);
                tracing::warn!(package = %package.qualified_name, %reason, "Download failed");
                status.record_download(&message);
                status.record_error(&message);
                sink.notify(EventKind::DownloadFailed, &message);
            }
            PackageOutcome::UninstallFailed(reason)
            | PackageOutcome::InstallFailed(reason)
            | PackageOutcome::VerificationFailed(reason) => {
                let message = format!("Install of {} failed: {}", package, reason);
                tracing::warn!(package = %package.qualified_name, %reason, "Install failed");
                status.record_error(&message);
                sink.notify(EventKind::InstallFailed, &message);
                if record.is(&self.self_package) {
                    sink.notify(EventKind::SelfUpdateFailed, &message);
                }
            }
            PackageOutcome::Cancelled => {
                status.record_info(format!("Run cancelled while processing {}", package));
            }
        }
    }
}
