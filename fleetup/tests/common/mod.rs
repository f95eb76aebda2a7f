//! In-memory fakes shared by the integration tests.
//!
//! - [`FakeServer`]: artifact transport with optional mid-body failures
//! - [`FakeDevice`]: package manager and installer; an install reads the
//!   version code from the artifact body (`version=<n>`)
//! - [`FakeManifest`]: manifest source returning a fixed response

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;

use fleetup::device::{CompletionCallback, InstallReport, PackageInspector, PrivilegedInstaller};
use fleetup::error::{InstallError, ProtocolError, TransferError};
use fleetup::manifest::{ManifestRequest, ManifestResponse, ManifestSource};
use fleetup::pipeline::{PipelineContext, ResumableDownloader, ResumeMarker, TransferResponse, Transport};
use fleetup::preferences::{IniPreferences, Preferences, SessionFlags};
use fleetup::scheduler::RetryPolicy;
use fleetup::status::{ChannelSink, Event, EventKind, PackageInfoCache, StatusBoard};
use fleetup::store::PackageStore;
use fleetup::{Action, Agent, AgentConfig, PackageRef, UpdateRecord};

pub const SELF_PACKAGE: &str = "org.fleetup.agent";
pub const LAST_MODIFIED: &str = "Wed, 02 Oct 2024 08:00:00 GMT";

// ============================================================================
// Artifact server
// ============================================================================

/// A request seen by [`FakeServer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenRequest {
    pub url: String,
    pub resume: Option<ResumeMarker>,
}

/// Serves artifact bodies by URL and honors `Range`/`If-Range`.
#[derive(Default)]
pub struct FakeServer {
    bodies: Mutex<HashMap<String, Vec<u8>>>,
    /// URL to the number of body bytes served before the connection drops.
    fail_after: Mutex<HashMap<String, usize>>,
    pub requests: Mutex<Vec<SeenRequest>>,
}

impl FakeServer {
    pub fn serve(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.bodies.lock().insert(url.to_string(), body.into());
    }

    /// Serve a `version=<n>` artifact padded to `size` bytes.
    pub fn serve_version(&self, url: &str, version: u32, size: usize) {
        let mut body = format!("version={}\n", version).into_bytes();
        body.resize(size.max(body.len()), b'#');
        self.serve(url, body);
    }

    /// Drop the next response for `url` after `bytes` body bytes.
    pub fn fail_next_after(&self, url: &str, bytes: usize) {
        self.fail_after.lock().insert(url.to_string(), bytes);
    }

    pub fn requests_for(&self, url: &str) -> Vec<SeenRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.url == url)
            .cloned()
            .collect()
    }
}

struct DroppingReader {
    inner: Cursor<Vec<u8>>,
    remaining: usize,
}

impl Read for DroppingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"));
        }
        let max = buf.len().min(self.remaining);
        let n = self.inner.read(&mut buf[..max])?;
        self.remaining -= n;
        Ok(n)
    }
}

impl Transport for FakeServer {
    fn get(&self, url: &str, resume: Option<&ResumeMarker>) -> Result<TransferResponse, TransferError> {
        self.requests.lock().push(SeenRequest {
            url: url.to_string(),
            resume: resume.cloned(),
        });

        let Some(full) = self.bodies.lock().get(url).cloned() else {
            return Ok(TransferResponse {
                status: 404,
                content_length: Some(0),
                last_modified: None,
                body: Box::new(io::empty()),
            });
        };

        let ranged = resume.filter(|m| m.last_modified == LAST_MODIFIED && (m.bytes as usize) < full.len());
        let (status, body) = match ranged {
            Some(marker) => (206, full[marker.bytes as usize..].to_vec()),
            None => (200, full),
        };
        let length = body.len() as u64;
        let reader: Box<dyn Read + Send> = match self.fail_after.lock().remove(url) {
            Some(limit) => Box::new(DroppingReader {
                inner: Cursor::new(body),
                remaining: limit,
            }),
            None => Box::new(Cursor::new(body)),
        };

        Ok(TransferResponse {
            status,
            content_length: Some(length),
            last_modified: Some(LAST_MODIFIED.to_string()),
            body: reader,
        })
    }
}

// ============================================================================
// Device
// ============================================================================

/// Package manager and privileged installer over a version table.
#[derive(Default)]
pub struct FakeDevice {
    installed: Mutex<HashMap<String, u32>>,
    rejects: Mutex<HashSet<String>>,
    /// Packages whose installs never report back.
    hangs: Mutex<HashSet<String>>,
    held: Mutex<Vec<CompletionCallback>>,
    unqueryable: Mutex<HashSet<String>>,
    pub operations: Mutex<Vec<String>>,
}

impl FakeDevice {
    pub fn set_installed(&self, name: &str, version: u32) {
        self.installed.lock().insert(name.to_string(), version);
    }

    pub fn reject(&self, name: &str) {
        self.rejects.lock().insert(name.to_string());
    }

    pub fn hang(&self, name: &str) {
        self.hangs.lock().insert(name.to_string());
    }

    /// Make package manager queries for `name` fail.
    pub fn fail_queries(&self, name: &str) {
        self.unqueryable.lock().insert(name.to_string());
    }

    pub fn installed_version_of(&self, name: &str) -> Option<u32> {
        self.installed.lock().get(name).copied()
    }

    pub fn operations(&self) -> Vec<String> {
        self.operations.lock().clone()
    }

    fn artifact_version(artifact: &Path) -> Option<u32> {
        let content = fs::read_to_string(artifact).ok()?;
        content.lines().next()?.strip_prefix("version=")?.parse().ok()
    }
}

impl PackageInspector for FakeDevice {
    fn installed_version(&self, name: &str) -> Result<Option<u32>, InstallError> {
        if self.unqueryable.lock().contains(name) {
            return Err(InstallError::Query {
                package: name.to_string(),
                reason: "exit status: 1".to_string(),
            });
        }
        Ok(self.installed.lock().get(name).copied())
    }
}

impl PrivilegedInstaller for FakeDevice {
    fn install(&self, package: &str, artifact: &Path, on_complete: CompletionCallback) -> Result<(), InstallError> {
        self.operations.lock().push(format!("install {}", package));
        if self.hangs.lock().contains(package) {
            self.held.lock().push(on_complete);
            return Ok(());
        }
        if self.rejects.lock().contains(package) {
            on_complete(InstallReport::new(package, -2, "INSTALL_FAILED_INVALID_APK"));
            return Ok(());
        }
        match Self::artifact_version(artifact) {
            Some(version) => {
                self.set_installed(package, version);
                on_complete(InstallReport::success(package));
            }
            None => on_complete(InstallReport::new(package, -2, "INSTALL_FAILED_INVALID_APK")),
        }
        Ok(())
    }

    fn uninstall(&self, package: &str, on_complete: CompletionCallback) -> Result<(), InstallError> {
        self.operations.lock().push(format!("uninstall {}", package));
        self.installed.lock().remove(package);
        on_complete(InstallReport::success(package));
        Ok(())
    }
}

// ============================================================================
// Manifest source
// ============================================================================

/// Returns the configured manifest and records requests.
#[derive(Default)]
pub struct FakeManifest {
    response: Mutex<ManifestResponse>,
    pub requests: Mutex<Vec<ManifestRequest>>,
}

impl FakeManifest {
    pub fn set(&self, response: ManifestResponse) {
        *self.response.lock() = response;
    }
}

impl ManifestSource for FakeManifest {
    fn fetch_manifest(&self, request: &ManifestRequest) -> Result<ManifestResponse, ProtocolError> {
        self.requests.lock().push(request.clone());
        Ok(self.response.lock().clone())
    }
}

pub fn url_for(name: &str) -> String {
    format!("https://cdn.example.org/packages/{}.pkg", name)
}

pub fn descriptor(name: &str, version: u32, action: Action) -> UpdateRecord {
    UpdateRecord::new(
        PackageRef::new(name, name.to_uppercase()),
        format!("{}.0", version),
        version,
        url_for(name),
        action,
    )
    .unwrap()
}

pub fn manifest(managed: bool, packages: Vec<UpdateRecord>) -> ManifestResponse {
    ManifestResponse {
        managed,
        packages,
        rejected: Vec::new(),
    }
}

// ============================================================================
// Test agent
// ============================================================================

fn agent_over(
    dir: &Path,
    server: &Arc<FakeServer>,
    device: &Arc<FakeDevice>,
    manifest: &Arc<FakeManifest>,
    min_interval: Duration,
) -> (Agent, Receiver<Event>) {
    let prefs: Arc<dyn Preferences> =
        Arc::new(IniPreferences::open(dir.join("preferences.ini")).unwrap());
    let flags = SessionFlags::new(Arc::clone(&prefs));
    let store = Arc::new(PackageStore::open(&dir.join("updater.db"), flags).unwrap());
    let downloader = ResumableDownloader::new(server.clone(), prefs, dir.join("downloads"));
    let (tx, events) = mpsc::channel();

    let ctx = PipelineContext {
        store,
        inspector: device.clone(),
        installer: device.clone(),
        downloader: Arc::new(downloader),
        status: Arc::new(StatusBoard::persistent(dir.join("status.json"))),
        cache: Arc::new(PackageInfoCache::new()),
        sink: Arc::new(ChannelSink::new(tx)),
    };
    let config = AgentConfig::new("device-42")
        .with_retry(RetryPolicy::None)
        .with_min_interval(min_interval)
        .with_install_timeout(Duration::from_secs(5))
        .with_pass_lock(dir.join("pass.lock"));
    (Agent::new(config, ctx, manifest.clone()), events)
}

/// An agent over on-disk storage in a temp directory and in-memory fakes.
///
/// [`TestAgent::restart`] builds a fresh agent over the same files, which is
/// how a process restart looks to the agent.
pub struct TestAgent {
    pub dir: TempDir,
    pub agent: Agent,
    pub server: Arc<FakeServer>,
    pub device: Arc<FakeDevice>,
    pub manifest: Arc<FakeManifest>,
    pub events: Receiver<Event>,
}

impl TestAgent {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        Self::build(
            dir,
            Arc::new(FakeServer::default()),
            Arc::new(FakeDevice::default()),
            Arc::new(FakeManifest::default()),
        )
    }

    fn build(dir: TempDir, server: Arc<FakeServer>, device: Arc<FakeDevice>, manifest: Arc<FakeManifest>) -> Self {
        let (agent, events) = agent_over(dir.path(), &server, &device, &manifest, Duration::ZERO);
        Self {
            dir,
            agent,
            server,
            device,
            manifest,
            events,
        }
    }

    /// A second agent over the same files and fakes, as a separate process
    /// on the same device would see them.
    pub fn sibling(&self, min_interval: Duration) -> Agent {
        agent_over(self.dir.path(), &self.server, &self.device, &self.manifest, min_interval).0
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dir.path().join("pass.lock")
    }

    /// Rebuild the agent over the same files and fakes.
    pub fn restart(self) -> Self {
        let Self {
            dir,
            agent,
            server,
            device,
            manifest,
            ..
        } = self;
        drop(agent);
        Self::build(dir, server, device, manifest)
    }

    pub fn store(&self) -> &PackageStore {
        self.agent.store()
    }

    pub fn event_kinds(&self) -> Vec<EventKind> {
        self.events.try_iter().map(|e| e.kind).collect()
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.dir.path().join("downloads")
    }
}
