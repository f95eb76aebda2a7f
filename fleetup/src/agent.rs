//! The update agent.
//!
//! [`Agent`] owns every component and runs update passes:
//!
//! ```text
//!  Trigger ─▶ Scheduler ─▶ check_for_updates ─────────────▶ sweep_removals
//!                           (retry: fetch manifest)              │
//!                           Reconciler ─▶ PackageStore           ▼
//!                                              auto_install ? InstallPipeline
//!                                                           : UpdatesAvailable
//! ```
//!
//! Construct it with [`Agent::from_config`] for the real device, or with
//! [`Agent::new`] over any [`PipelineContext`] and [`ManifestSource`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::config::ConfigFile;
use crate::device::{PackageInspector, PmShell};
use crate::error::{ConfigError, StorageError, UpdaterError, UpdaterResult};
use crate::manifest::{
    HostAllowList, HttpManifestClient, ManifestClientConfig, ManifestRequest, ManifestResponse,
    ManifestSource,
};
use crate::pipeline::{
    HttpTransport, InstallPipeline, PipelineContext, ResumableDownloader, RunSummary,
    DEFAULT_DOWNLOAD_TIMEOUT_SECS,
};
use crate::preferences::{IniPreferences, Preferences, SessionFlags, KEY_POLL_FREQUENCY};
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::scheduler::{
    Decision, PassLock, RetryError, RetryPolicy, Scheduler, Trigger, DEFAULT_STALE_LOCK_SECS,
};
use crate::status::{EventKind, EventSink, PackageInfoCache, StatusBoard};
use crate::store::PackageStore;

/// Settings the agent runs with.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub device_id: String,
    pub group: String,
    /// Package name of the agent itself.
    pub self_package: String,
    /// Install queued updates right after a check.
    pub auto_install: bool,
    /// Retry policy around the manifest fetch.
    pub retry: RetryPolicy,
    pub min_interval: Duration,
    pub frequency: Duration,
    pub install_timeout: Duration,
    /// Lock file shared with other processes running passes on this device.
    pub pass_lock: Option<PathBuf>,
}

impl AgentConfig {
    /// Defaults for a device id.
    pub fn new(device_id: impl Into<String>) -> Self {
        Self::from_parts(device_id.into(), &ConfigFile::default())
    }

    /// Build from a configuration file, resolving the device id.
    pub fn from_config(config: &ConfigFile) -> Result<Self, ConfigError> {
        Ok(Self::from_parts(config.device_id()?, config))
    }

    fn from_parts(device_id: String, config: &ConfigFile) -> Self {
        let schedule = &config.schedule;
        Self {
            device_id,
            group: config.device.group.clone(),
            self_package: config.device.self_package.clone(),
            auto_install: schedule.auto_install,
            retry: RetryPolicy::fixed(
                schedule.retry_attempts,
                Duration::from_secs(schedule.retry_delay_secs),
            ),
            min_interval: Duration::from_secs(schedule.min_interval_secs),
            frequency: Duration::from_secs(schedule.frequency_minutes * 60),
            install_timeout: Duration::from_secs(config.installer.install_timeout_secs),
            pass_lock: None,
        }
    }

    pub fn with_auto_install(mut self, auto_install: bool) -> Self {
        self.auto_install = auto_install;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    pub fn with_install_timeout(mut self, timeout: Duration) -> Self {
        self.install_timeout = timeout;
        self
    }

    pub fn with_pass_lock(mut self, path: impl Into<PathBuf>) -> Self {
        self.pass_lock = Some(path.into());
        self
    }
}

/// What one update pass did.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub reconcile: ReconcileReport,
    /// Pending removals cleared because the package is gone.
    pub removals_cleared: Vec<String>,
    /// Pipeline run, when updates were installed automatically.
    pub run: Option<RunSummary>,
}

/// What came of a trigger.
#[derive(Debug)]
pub enum TriggerOutcome {
    /// A pass ran.
    Ran(CycleReport),
    /// The scheduler dropped the trigger.
    Skipped,
    /// The periodic timer should be (re)installed.
    TimerScheduled(Duration),
}

/// Update agent context.
pub struct Agent {
    config: AgentConfig,
    ctx: PipelineContext,
    manifest: Arc<dyn ManifestSource>,
    reconciler: Reconciler,
    pipeline: InstallPipeline,
    scheduler: Scheduler,
}

impl Agent {
    /// Assemble an agent from its collaborators.
    pub fn new(config: AgentConfig, ctx: PipelineContext, manifest: Arc<dyn ManifestSource>) -> Self {
        let reconciler = Reconciler::new(
            Arc::clone(&ctx.store),
            Arc::clone(&ctx.inspector),
            Arc::clone(&ctx.cache),
        );
        let pipeline = InstallPipeline::new(ctx.clone(), config.self_package.clone())
            .with_install_timeout(config.install_timeout);

        let scheduler = Scheduler::new(config.min_interval, config.frequency);
        let saved_minutes = ctx
            .store
            .flags()
            .preferences()
            .get_u64(KEY_POLL_FREQUENCY)
            .filter(|m| *m > 0);
        if let Some(minutes) = saved_minutes {
            scheduler.set_frequency(Duration::from_secs(minutes * 60));
        }

        Self {
            config,
            ctx,
            manifest,
            reconciler,
            pipeline,
            scheduler,
        }
    }

    /// Build the agent for this device from a configuration file.
    pub fn from_config(file: &ConfigFile, sink: Arc<dyn EventSink>) -> UpdaterResult<Self> {
        let storage = &file.storage;
        let config = AgentConfig::from_config(file)?.with_pass_lock(storage.lock_path());

        let prefs: Arc<dyn Preferences> = Arc::new(IniPreferences::open(storage.preferences_path())?);
        let flags = SessionFlags::new(Arc::clone(&prefs));
        let store = Arc::new(PackageStore::open(&storage.database_path(), flags)?);

        let client_config = ManifestClientConfig::new(file.server.url.clone())
            .with_allowed_hosts(file.server.allowed_hosts.clone())
            .with_proxy(file.server.proxy.clone())
            .with_timeout(Duration::from_secs(file.server.timeout_secs));
        let manifest = Arc::new(HttpManifestClient::new(&client_config)?);

        let mut transport = HttpTransport::with_options(
            Duration::from_secs(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
            file.server.proxy.as_deref(),
        )?;
        if !file.server.allowed_hosts.is_empty() {
            transport =
                transport.with_allowed_hosts(HostAllowList::new(file.server.allowed_hosts.iter()));
        }
        let downloader = ResumableDownloader::new(Arc::new(transport), prefs, storage.scratch_path());

        let shell = Arc::new(PmShell::new(file.installer.pm_command.clone()));
        let ctx = PipelineContext {
            store,
            inspector: shell.clone(),
            installer: shell,
            downloader: Arc::new(downloader),
            status: Arc::new(StatusBoard::persistent(storage.status_path())),
            cache: Arc::new(PackageInfoCache::new()),
            sink,
        };

        tracing::info!(
            device_id = %config.device_id,
            group = %config.group,
            server = %file.server.url,
            "Agent configured"
        );
        Ok(Self::new(config, ctx, manifest))
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    pub fn store(&self) -> &PackageStore {
        &self.ctx.store
    }

    pub fn status(&self) -> &StatusBoard {
        &self.ctx.status
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Persist a poll frequency override and apply it on the next `Boot`.
    pub fn set_poll_frequency(&self, minutes: u64) -> Result<(), StorageError> {
        self.ctx
            .store
            .flags()
            .preferences()
            .set(KEY_POLL_FREQUENCY, &minutes.to_string())?;
        self.scheduler
            .set_frequency(Duration::from_secs(minutes.max(1) * 60));
        Ok(())
    }

    /// Account for a self-update that never reported back.
    ///
    /// Call once at startup. Returns `true` when a dangling flag was found;
    /// the flag is cleared so later calls return `false`.
    pub fn recover_self_update(&self) -> Result<bool, StorageError> {
        if !self.ctx.store.flags().take_self_update_pending()? {
            return Ok(false);
        }

        let message = format!("Self-update of {} failed", self.config.self_package);
        tracing::error!(package = %self.config.self_package, "{}", message);
        self.ctx.status.record_error(&message);
        self.ctx.sink.notify(EventKind::SelfUpdateFailed, &message);
        Ok(true)
    }

    /// Request listing every managed package with its installed version.
    ///
    /// Fails when the package manager cannot be queried, since a missing
    /// version would tell the server the package is not installed.
    pub fn build_request(&self) -> UpdaterResult<ManifestRequest> {
        let mut request =
            ManifestRequest::new(self.config.device_id.clone(), self.config.group.clone());
        for package in self.ctx.store.list_managed()? {
            let installed = self.ctx.inspector.installed_version(&package.qualified_name)?;
            request = request.with_package(package.qualified_name, installed);
        }
        Ok(request)
    }

    /// Fetch the manifest (with retries) and reconcile the store against it.
    ///
    /// A fetch or protocol failure records a retrieval error and leaves the
    /// store untouched.
    pub fn check_for_updates(&self, kill: &CancellationToken) -> UpdaterResult<ReconcileReport> {
        self.ctx
            .sink
            .notify(EventKind::CheckStarted, "Checking for updates");

        let fetched = self.config.retry.run(kill, |attempt| {
            tracing::debug!(attempt, "Fetching manifest");
            self.fetch()
        });
        let manifest = match fetched {
            Ok(manifest) => manifest,
            Err(RetryError::Cancelled) => return Err(UpdaterError::Cancelled),
            Err(RetryError::Exhausted { attempts, last }) => {
                let message = format!("Update check failed after {} attempt(s): {}", attempts, last);
                tracing::warn!(attempts, error = %last, "Update check failed");
                self.ctx.cache.set_retrieval_error(last.to_string());
                self.ctx.status.record_check(&message);
                self.ctx.status.record_error(&message);
                self.ctx
                    .status
                    .set_packages(self.ctx.cache.entries(), self.ctx.cache.retrieval_error());
                self.ctx.sink.notify(EventKind::CheckFailed, &message);
                return Err(last);
            }
        };

        self.ctx.cache.clear_retrieval_error();
        let report = self.reconciler.reconcile(&manifest)?;

        let summary = format!(
            "Manifest lists {} package(s); {} queued, {} optional, {} unmanaged",
            manifest.packages.len(),
            report.queued.len(),
            report.optional.len(),
            report.unmanaged.len()
        );
        self.ctx.status.record_check(&summary);
        if !report.is_quiet() {
            self.ctx.status.record_info(&summary);
        }
        self.ctx
            .status
            .set_packages(self.ctx.cache.entries(), None);
        Ok(report)
    }

    fn fetch(&self) -> UpdaterResult<ManifestResponse> {
        let request = self.build_request()?;
        Ok(self.manifest.fetch_manifest(&request)?)
    }

    /// Clear pending removals whose package is no longer installed.
    pub fn sweep_removals(&self) -> Result<Vec<String>, StorageError> {
        let mut cleared = Vec::new();
        for name in self.ctx.store.list_pending_removals()? {
            match self.ctx.inspector.is_installed(&name) {
                Ok(false) => {}
                Ok(true) => continue,
                Err(e) => {
                    tracing::warn!(package = %name, error = %e, "Cannot confirm removal, keeping it pending");
                    continue;
                }
            }
            self.ctx.store.remove_pending_removal(&name)?;
            tracing::info!(package = %name, "Removal confirmed");
            self.ctx
                .sink
                .notify(EventKind::RemovalConfirmed, &format!("{} was removed", name));
            cleared.push(name);
        }
        Ok(cleared)
    }

    /// Acknowledge a pending removal by hand.
    pub fn acknowledge_removal(&self, name: &str) -> Result<bool, StorageError> {
        let removed = self.ctx.store.remove_pending_removal(name)? > 0;
        if removed {
            self.ctx
                .sink
                .notify(EventKind::RemovalConfirmed, &format!("{} acknowledged", name));
        }
        Ok(removed)
    }

    /// Take the cross-process pass lock, when one is configured.
    ///
    /// `Ok(None)` means no lock is configured; [`UpdaterError::Busy`] means
    /// another process holds it.
    pub fn lock_pass(&self) -> UpdaterResult<Option<PassLock>> {
        let Some(path) = &self.config.pass_lock else {
            return Ok(None);
        };
        match PassLock::acquire(path, Duration::from_secs(DEFAULT_STALE_LOCK_SECS))? {
            Some(lock) => Ok(Some(lock)),
            None => Err(UpdaterError::Busy),
        }
    }

    /// Run the install pipeline over queued updates, unless another process
    /// is running a pass.
    pub fn install_updates(&self, kill: &CancellationToken) -> UpdaterResult<RunSummary> {
        let _lock = self.lock_pass()?;
        Ok(self.pipeline.run(kill)?)
    }

    /// Whether a pass started in any process less than `min_interval` ago.
    fn passed_recently(&self) -> bool {
        let Some(last) = self.ctx.store.flags().last_pass() else {
            return false;
        };
        match (Utc::now() - last).to_std() {
            Ok(since_last) if since_last < self.config.min_interval => {
                tracing::info!(
                    since_last_secs = since_last.as_secs(),
                    "Update pass ran recently in another process, dropping trigger"
                );
                true
            }
            _ => false,
        }
    }

    /// One full pass: check, sweep removals, then install or notify.
    ///
    /// Does not take the pass lock; [`Agent::handle_trigger`] does.
    pub fn run_cycle(&self, kill: &CancellationToken) -> UpdaterResult<CycleReport> {
        let reconcile = self.check_for_updates(kill)?;
        let removals_cleared = self.sweep_removals()?;

        let mut report = CycleReport {
            reconcile,
            removals_cleared,
            run: None,
        };

        if self.config.auto_install && report.reconcile.has_actionable() {
            report.run = Some(self.pipeline.run(kill)?);
        } else if !report.reconcile.queued.is_empty() || !report.reconcile.optional.is_empty() {
            let count = report.reconcile.queued.len() + report.reconcile.optional.len();
            self.ctx.sink.notify(
                EventKind::UpdatesAvailable,
                &format!("{} update(s) available", count),
            );
        }
        Ok(report)
    }

    /// Route a trigger through the scheduler and run a pass if allowed.
    pub fn handle_trigger(&self, trigger: Trigger, kill: &CancellationToken) -> UpdaterResult<TriggerOutcome> {
        match self.scheduler.on_trigger(trigger) {
            Decision::ScheduleTimer { period } => Ok(TriggerOutcome::TimerScheduled(period)),
            Decision::Throttled { .. } | Decision::Busy => Ok(TriggerOutcome::Skipped),
            Decision::Run(permit) => {
                if self.passed_recently() {
                    return Ok(TriggerOutcome::Skipped);
                }
                let lock = match self.lock_pass() {
                    Ok(lock) => lock,
                    Err(UpdaterError::Busy) => {
                        tracing::info!(trigger = %permit.trigger(), "Update pass running in another process, dropping trigger");
                        return Ok(TriggerOutcome::Skipped);
                    }
                    Err(e) => return Err(e),
                };
                self.ctx.store.flags().set_last_pass(Utc::now())?;

                tracing::info!(trigger = %permit.trigger(), "Starting update pass");
                let result = self.run_cycle(kill);
                drop(lock);
                drop(permit);
                result.map(TriggerOutcome::Ran)
            }
        }
    }
}
