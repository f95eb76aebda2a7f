//! Resumable artifact downloads.
//!
//! This module provides:
//! - The [`Transport`] seam over HTTP GET with optional `Range`/`If-Range`
//! - [`HttpTransport`], the blocking reqwest implementation
//! - [`ResumableDownloader`], which streams to a per-package scratch file and
//!   persists resume markers when a transfer is interrupted

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{CONTENT_LENGTH, IF_RANGE, LAST_MODIFIED, RANGE};
use reqwest::{Proxy, Url};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::error::TransferError;
use crate::manifest::HostAllowList;
use crate::package::UpdateRecord;
use crate::preferences::Preferences;

/// Default timeout for artifact downloads in seconds.
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300; // 5 minutes

/// Buffer size for reading/writing during downloads (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

const STATUS_OK: u16 = 200;
const STATUS_PARTIAL_CONTENT: u16 = 206;

/// Extension of scratch files.
const ARTIFACT_EXTENSION: &str = "pkg";

/// Where an interrupted transfer left off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeMarker {
    /// Bytes already on disk.
    pub bytes: u64,
    /// `Last-Modified` of the original response, sent back as `If-Range`.
    pub last_modified: String,
}

/// Response to a GET, as seen by the downloader.
pub struct TransferResponse {
    /// HTTP status code.
    pub status: u16,
    /// `Content-Length` of this response.
    pub content_length: Option<u64>,
    /// `Last-Modified` header value.
    pub last_modified: Option<String>,
    /// Response body.
    pub body: Box<dyn Read + Send>,
}

/// HTTP GET with optional resume.
///
/// With a marker the request must carry `Range: bytes=<bytes>-` and
/// `If-Range: <last_modified>`.
pub trait Transport: Send + Sync {
    fn get(&self, url: &str, resume: Option<&ResumeMarker>)
        -> Result<TransferResponse, TransferError>;
}

// =============================================================================
// HTTP transport
// =============================================================================

/// Blocking reqwest transport.
#[derive(Debug)]
pub struct HttpTransport {
    client: Client,
    allow: Option<HostAllowList>,
    pub(crate) timeout: Duration,
}

impl HttpTransport {
    /// Create a transport with the default timeout and no proxy.
    pub fn new() -> Result<Self, TransferError> {
        Self::with_options(Duration::from_secs(DEFAULT_DOWNLOAD_TIMEOUT_SECS), None)
    }

    /// Create a transport with a custom timeout and optional proxy.
    pub fn with_options(timeout: Duration, proxy: Option<&str>) -> Result<Self, TransferError> {
        let client_failed = |reason: String| TransferError::Connect {
            url: proxy.unwrap_or_default().to_string(),
            reason,
        };

        let mut builder = Client::builder().timeout(timeout);
        if let Some(proxy) = proxy {
            builder = builder.proxy(Proxy::all(proxy).map_err(|e| client_failed(e.to_string()))?);
        }
        let client = builder.build().map_err(|e| client_failed(e.to_string()))?;

        Ok(Self {
            client,
            allow: None,
            timeout,
        })
    }

    /// Restrict downloads to the given hosts.
    pub fn with_allowed_hosts(mut self, allow: HostAllowList) -> Self {
        self.allow = Some(allow);
        self
    }

    fn check_host(&self, url: &str) -> Result<(), TransferError> {
        let Some(allow) = &self.allow else {
            return Ok(());
        };
        let parsed = Url::parse(url).map_err(|e| TransferError::Connect {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        match parsed.host_str() {
            Some(host) if allow.permits(host) => Ok(()),
            host => Err(TransferError::HostNotAllowed(
                host.unwrap_or_default().to_string(),
            )),
        }
    }
}

impl Transport for HttpTransport {
    fn get(
        &self,
        url: &str,
        resume: Option<&ResumeMarker>,
    ) -> Result<TransferResponse, TransferError> {
        self.check_host(url)?;

        let mut request = self.client.get(url);
        if let Some(marker) = resume {
            request = request
                .header(RANGE, format!("bytes={}-", marker.bytes))
                .header(IF_RANGE, marker.last_modified.as_str());
        }

        let response = request.send().map_err(|e| TransferError::Connect {
            url: url.to_string(),
            reason: if e.is_timeout() {
                format!("timed out after {}s", self.timeout.as_secs())
            } else {
                e.to_string()
            },
        })?;

        let header = |name| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let content_length = header(CONTENT_LENGTH).and_then(|v| v.parse::<u64>().ok());
        let last_modified = header(LAST_MODIFIED);

        Ok(TransferResponse {
            status: response.status().as_u16(),
            content_length,
            last_modified,
            body: Box::new(response),
        })
    }
}

// =============================================================================
// Resumable downloader
// =============================================================================

/// Downloads artifacts into a scratch directory, resuming where a previous
/// attempt stopped.
///
/// The scratch file for a package is named after its qualified name. Resume
/// markers are kept in preferences under per-package keys and are only
/// written when the server supplied a `Last-Modified` value to resume
/// against.
pub struct ResumableDownloader {
    transport: Arc<dyn Transport>,
    prefs: Arc<dyn Preferences>,
    scratch_dir: PathBuf,
}

impl ResumableDownloader {
    pub fn new(
        transport: Arc<dyn Transport>,
        prefs: Arc<dyn Preferences>,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            transport,
            prefs,
            scratch_dir: scratch_dir.into(),
        }
    }

    /// Scratch directory.
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Scratch file for a package.
    ///
    /// Names that need sanitizing get a short digest of the original name
    /// appended, so distinct names never share a file.
    pub fn artifact_path(&self, name: &str) -> PathBuf {
        let sanitized: String = name
            .chars()
            .map(|c| match c {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
                _ => '_',
            })
            .collect();
        let trimmed = sanitized.trim_start_matches('.');
        let file_name = if trimmed == name {
            trimmed.to_string()
        } else {
            format!("{}-{}", trimmed, name_digest(name))
        };
        self.scratch_dir
            .join(format!("{}.{}", file_name, ARTIFACT_EXTENSION))
    }

    /// Saved resume marker for a package.
    pub fn resume_marker(&self, name: &str) -> Option<ResumeMarker> {
        let bytes = self.prefs.get_u64(&bytes_key(name)).filter(|b| *b > 0)?;
        let last_modified = self
            .prefs
            .get(&last_modified_key(name))
            .filter(|v| !v.is_empty())?;
        Some(ResumeMarker {
            bytes,
            last_modified,
        })
    }

    /// Delete the scratch file and resume markers for a package.
    pub fn discard(&self, name: &str) {
        let path = self.artifact_path(name);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove artifact");
            }
        }
        self.clear_marker(name);
    }

    /// Download the artifact for `record`.
    ///
    /// `progress` receives `(bytes_downloaded, total_bytes)` after every
    /// chunk. A kill request stops the transfer between chunks with
    /// [`TransferError::Cancelled`] and keeps the partial file.
    pub fn download(
        &self,
        record: &UpdateRecord,
        kill: &CancellationToken,
        progress: &dyn Fn(u64, u64),
    ) -> Result<PathBuf, TransferError> {
        let name = record.qualified_name.as_str();
        let url = record.url.as_str();
        let dest = self.artifact_path(name);
        self.prepare_scratch_dir()?;

        let mut marker = self.usable_marker(name, &dest);
        tracing::info!(
            package = name,
            resume_from = marker.as_ref().map(|m| m.bytes).unwrap_or(0),
            "Starting download"
        );

        let mut response = self.transport.get(url, marker.as_ref())?;
        if let Some(previous) = &marker {
            if !accepts_resume(&response) {
                tracing::info!(
                    package = name,
                    status = response.status,
                    resume_from = previous.bytes,
                    "Server refused resume, restarting from zero"
                );
                self.clear_marker(name);
                marker = None;
                response = self.transport.get(url, None)?;
            }
        }

        let (start, last_modified) = match (response.status, &marker) {
            (STATUS_PARTIAL_CONTENT, Some(m)) => (m.bytes, m.last_modified.clone()),
            (STATUS_OK, previous) => {
                if previous.is_some() {
                    tracing::info!(package = name, "Server restarted transfer from zero");
                }
                (0, response.last_modified.clone().unwrap_or_default())
            }
            _ => {
                return Err(TransferError::Status {
                    url: url.to_string(),
                    status: response.status,
                })
            }
        };

        let total = match response.content_length {
            Some(length) if length > 0 => length + start,
            _ => {
                return Err(TransferError::InvalidLength {
                    url: url.to_string(),
                })
            }
        };

        let file = self.prepare_destination(&dest, start)?;
        if start == 0 {
            self.clear_marker(name);
        }

        let downloaded = self.stream_download(
            name,
            url,
            response.body,
            file,
            &dest,
            start,
            total,
            &last_modified,
            kill,
            progress,
        )?;

        if downloaded != total {
            if downloaded > total {
                self.discard(name);
            } else {
                self.save_marker(name, downloaded, &last_modified);
            }
            return Err(TransferError::Incomplete {
                url: url.to_string(),
                received: downloaded,
                expected: total,
            });
        }

        self.clear_marker(name);
        set_world_readable(&dest);
        tracing::info!(package = name, bytes = total, "Download complete");
        Ok(dest)
    }

    /// Marker that still matches the scratch file on disk.
    fn usable_marker(&self, name: &str, dest: &Path) -> Option<ResumeMarker> {
        let marker = self.resume_marker(name)?;
        let on_disk = fs::metadata(dest).map(|m| m.len()).unwrap_or(0);
        if marker.bytes > on_disk {
            tracing::debug!(
                package = name,
                marker = marker.bytes,
                on_disk,
                "Discarding stale resume marker"
            );
            self.clear_marker(name);
            return None;
        }
        Some(marker)
    }

    fn prepare_scratch_dir(&self) -> Result<(), TransferError> {
        fs::create_dir_all(&self.scratch_dir).map_err(|e| TransferError::Write {
            path: self.scratch_dir.clone(),
            source: e,
        })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // Traversable but not listable, so the installer can reach the file.
            if let Err(e) = fs::set_permissions(&self.scratch_dir, fs::Permissions::from_mode(0o711)) {
                tracing::warn!(
                    path = %self.scratch_dir.display(),
                    error = %e,
                    "Failed to set scratch directory permissions"
                );
            }
        }
        Ok(())
    }

    /// Open the scratch file positioned at `start`.
    fn prepare_destination(&self, dest: &Path, start: u64) -> Result<File, TransferError> {
        let write_failed = |e| TransferError::Write {
            path: dest.to_path_buf(),
            source: e,
        };

        if start > 0 {
            let file = OpenOptions::new()
                .write(true)
                .open(dest)
                .map_err(write_failed)?;
            file.set_len(start).map_err(write_failed)?;
            drop(file);
            OpenOptions::new()
                .append(true)
                .open(dest)
                .map_err(write_failed)
        } else {
            File::create(dest).map_err(write_failed)
        }
    }

    /// Stream the body to the scratch file. Returns total bytes on disk.
    #[allow(clippy::too_many_arguments)]
    fn stream_download(
        &self,
        name: &str,
        url: &str,
        mut body: Box<dyn Read + Send>,
        file: File,
        dest: &Path,
        start: u64,
        total: u64,
        last_modified: &str,
        kill: &CancellationToken,
        progress: &dyn Fn(u64, u64),
    ) -> Result<u64, TransferError> {
        let mut writer = BufWriter::new(file);
        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut downloaded = start;

        loop {
            if downloaded == total {
                break;
            }
            if kill.is_cancelled() {
                self.suspend(name, &mut writer, downloaded, last_modified);
                tracing::info!(package = name, bytes = downloaded, "Download cancelled");
                return Err(TransferError::Cancelled { bytes: downloaded });
            }

            let bytes_read = match body.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.suspend(name, &mut writer, downloaded, last_modified);
                    return Err(TransferError::Read {
                        url: url.to_string(),
                        source: e,
                    });
                }
            };

            if let Err(e) = writer.write_all(&buffer[..bytes_read]) {
                self.clear_marker(name);
                return Err(TransferError::Write {
                    path: dest.to_path_buf(),
                    source: e,
                });
            }

            downloaded += bytes_read as u64;
            progress(downloaded, total);
        }

        writer.flush().map_err(|e| {
            self.clear_marker(name);
            TransferError::Write {
                path: dest.to_path_buf(),
                source: e,
            }
        })?;

        Ok(downloaded)
    }

    /// Flush what was received and record where to resume.
    fn suspend(
        &self,
        name: &str,
        writer: &mut BufWriter<File>,
        downloaded: u64,
        last_modified: &str,
    ) {
        match writer.flush() {
            Ok(()) => self.save_marker(name, downloaded, last_modified),
            Err(e) => {
                tracing::warn!(package = name, error = %e, "Failed to flush partial download");
                self.clear_marker(name);
            }
        }
    }

    fn save_marker(&self, name: &str, bytes: u64, last_modified: &str) {
        if bytes == 0 || last_modified.is_empty() {
            self.clear_marker(name);
            return;
        }
        let result = self
            .prefs
            .set(&bytes_key(name), &bytes.to_string())
            .and_then(|_| self.prefs.set(&last_modified_key(name), last_modified));
        match result {
            Ok(()) => tracing::debug!(package = name, bytes, "Saved resume marker"),
            Err(e) => tracing::warn!(package = name, error = %e, "Failed to save resume marker"),
        }
    }

    fn clear_marker(&self, name: &str) {
        let result = self
            .prefs
            .remove(&bytes_key(name))
            .and_then(|_| self.prefs.remove(&last_modified_key(name)));
        if let Err(e) = result {
            tracing::warn!(package = name, error = %e, "Failed to clear resume marker");
        }
    }
}

/// Whether a response to a ranged request can be used as-is.
///
/// `200` restarts the file; `206` must carry a body. Anything else (`416`
/// for a marker at or past the end) means the marker is unusable.
fn accepts_resume(response: &TransferResponse) -> bool {
    match response.status {
        STATUS_OK => true,
        STATUS_PARTIAL_CONTENT => response.content_length.is_some_and(|len| len > 0),
        _ => false,
    }
}

/// First 8 hex digits of the SHA-256 of `name`.
fn name_digest(name: &str) -> String {
    Sha256::digest(name.as_bytes())
        .iter()
        .take(4)
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn bytes_key(name: &str) -> String {
    format!("resume.{}.bytes", name)
}

fn last_modified_key(name: &str) -> String {
    format!("resume.{}.last_modified", name)
}

fn set_world_readable(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o644)) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to set artifact permissions");
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{Action, PackageRef};
    use crate::preferences::MemoryPreferences;
    use parking_lot::Mutex;
    use std::io::Cursor;
    use tempfile::TempDir;

    /// Serves a fixed body, honoring ranges, optionally failing mid-body.
    struct FakeTransport {
        content: Vec<u8>,
        last_modified: Option<String>,
        fail_after: Mutex<Option<usize>>,
        /// Answer every ranged request with 416.
        reject_ranges: bool,
        requests: Mutex<Vec<Option<ResumeMarker>>>,
    }

    impl FakeTransport {
        fn new(content: &[u8]) -> Self {
            Self {
                content: content.to_vec(),
                last_modified: Some("Tue, 01 Oct 2024 10:00:00 GMT".to_string()),
                fail_after: Mutex::new(None),
                reject_ranges: false,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    /// Reader that errors once `limit` bytes have been served.
    struct FailingReader {
        inner: Cursor<Vec<u8>>,
        remaining: usize,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.remaining == 0 {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
            }
            let max = buf.len().min(self.remaining);
            let n = self.inner.read(&mut buf[..max])?;
            self.remaining -= n;
            Ok(n)
        }
    }

    impl Transport for FakeTransport {
        fn get(
            &self,
            _url: &str,
            resume: Option<&ResumeMarker>,
        ) -> Result<TransferResponse, TransferError> {
            self.requests.lock().push(resume.cloned());
            if resume.is_some() && self.reject_ranges {
                return Ok(TransferResponse {
                    status: 416,
                    content_length: Some(0),
                    last_modified: self.last_modified.clone(),
                    body: Box::new(io::empty()),
                });
            }
            let start = resume
                .map(|m| m.bytes as usize)
                .unwrap_or(0)
                .min(self.content.len());
            let body = self.content[start..].to_vec();
            let length = body.len() as u64;
            let reader: Box<dyn Read + Send> = match self.fail_after.lock().take() {
                Some(limit) => Box::new(FailingReader {
                    inner: Cursor::new(body),
                    remaining: limit,
                }),
                None => Box::new(Cursor::new(body)),
            };
            Ok(TransferResponse {
                status: if start > 0 { 206 } else { 200 },
                content_length: Some(length),
                last_modified: self.last_modified.clone(),
                body: reader,
            })
        }
    }

    fn record() -> UpdateRecord {
        UpdateRecord::new(
            PackageRef::new("org.example.app", "Example"),
            "2.0",
            2,
            "https://updates.example.org/app.pkg",
            Action::Update,
        )
        .unwrap()
    }

    fn downloader(transport: Arc<FakeTransport>, dir: &Path) -> ResumableDownloader {
        ResumableDownloader::new(transport, Arc::new(MemoryPreferences::new()), dir)
    }

    #[test]
    fn test_fresh_download() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(FakeTransport::new(b"0123456789"));
        let dl = downloader(transport.clone(), temp.path());

        let seen = Mutex::new(Vec::new());
        let path = dl
            .download(&record(), &CancellationToken::new(), &|done, total| {
                seen.lock().push((done, total))
            })
            .unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"0123456789");
        assert_eq!(seen.lock().last(), Some(&(10, 10)));
        assert!(dl.resume_marker("org.example.app").is_none());
        assert_eq!(transport.requests.lock().as_slice(), &[None]);
    }

    #[cfg(unix)]
    #[test]
    fn test_scratch_dir_is_traversable_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let scratch = temp.path().join("scratch");
        let dl = downloader(Arc::new(FakeTransport::new(b"abc")), &scratch);

        dl.download(&record(), &CancellationToken::new(), &|_, _| {})
            .unwrap();

        let mode = fs::metadata(&scratch).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o711);
    }

    #[test]
    fn test_resume_after_read_failure() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(FakeTransport::new(b"abcdefghijklmnop"));
        *transport.fail_after.lock() = Some(6);
        let dl = downloader(transport.clone(), temp.path());

        let err = dl
            .download(&record(), &CancellationToken::new(), &|_, _| {})
            .unwrap_err();
        assert!(matches!(err, TransferError::Read { .. }));

        let marker = dl.resume_marker("org.example.app").unwrap();
        assert_eq!(marker.bytes, 6);

        let path = dl
            .download(&record(), &CancellationToken::new(), &|_, _| {})
            .unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"abcdefghijklmnop");

        let requests = transport.requests.lock();
        assert_eq!(requests[1].as_ref().map(|m| m.bytes), Some(6));
        assert!(dl.resume_marker("org.example.app").is_none());
    }

    #[test]
    fn test_no_marker_without_last_modified() {
        let temp = TempDir::new().unwrap();
        let mut fake = FakeTransport::new(b"abcdefgh");
        fake.last_modified = None;
        *fake.fail_after.lock() = Some(3);
        let dl = downloader(Arc::new(fake), temp.path());

        assert!(dl
            .download(&record(), &CancellationToken::new(), &|_, _| {})
            .is_err());
        assert!(dl.resume_marker("org.example.app").is_none());
    }

    #[test]
    fn test_kill_keeps_partial_file() {
        let temp = TempDir::new().unwrap();
        let dl = downloader(Arc::new(FakeTransport::new(b"abcdefgh")), temp.path());

        let kill = CancellationToken::new();
        kill.cancel();
        let err = dl.download(&record(), &kill, &|_, _| {}).unwrap_err();

        assert!(err.is_cancelled());
        assert!(dl.artifact_path("org.example.app").exists());
    }

    #[test]
    fn test_kill_after_last_chunk_completes() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(FakeTransport::new(b"abcdefgh"));
        let dl = downloader(transport.clone(), temp.path());

        let kill = CancellationToken::new();
        let path = dl
            .download(&record(), &kill, &|done, total| {
                if done == total {
                    kill.cancel();
                }
            })
            .unwrap();

        assert_eq!(fs::read(path).unwrap(), b"abcdefgh");
        assert!(dl.resume_marker("org.example.app").is_none());
    }

    /// Seed a complete scratch file with a marker pointing at its end.
    fn seed_marker_at_end(dl: &ResumableDownloader, content: &[u8]) {
        fs::create_dir_all(dl.scratch_dir()).unwrap();
        fs::write(dl.artifact_path("org.example.app"), content).unwrap();
        dl.save_marker(
            "org.example.app",
            content.len() as u64,
            "Tue, 01 Oct 2024 10:00:00 GMT",
        );
    }

    #[test]
    fn test_empty_partial_response_restarts() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(FakeTransport::new(b"abcdefgh"));
        let dl = downloader(transport.clone(), temp.path());
        seed_marker_at_end(&dl, b"abcdefgh");

        let path = dl
            .download(&record(), &CancellationToken::new(), &|_, _| {})
            .unwrap();

        assert_eq!(fs::read(path).unwrap(), b"abcdefgh");
        let requests = transport.requests.lock();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].as_ref().map(|m| m.bytes), Some(8));
        assert_eq!(requests[1], None);
        assert!(dl.resume_marker("org.example.app").is_none());
    }

    #[test]
    fn test_range_not_satisfiable_restarts() {
        let temp = TempDir::new().unwrap();
        let mut fake = FakeTransport::new(b"abcdefgh");
        fake.reject_ranges = true;
        let transport = Arc::new(fake);
        let dl = downloader(transport.clone(), temp.path());
        seed_marker_at_end(&dl, b"abcdefgh");

        let path = dl
            .download(&record(), &CancellationToken::new(), &|_, _| {})
            .unwrap();
        assert_eq!(fs::read(path).unwrap(), b"abcdefgh");

        // The next download no longer carries the bad marker.
        dl.download(&record(), &CancellationToken::new(), &|_, _| {})
            .unwrap();
        let requests = transport.requests.lock();
        assert_eq!(requests.len(), 3);
        assert!(requests[0].is_some());
        assert_eq!(requests[1], None);
        assert_eq!(requests[2], None);
    }

    #[test]
    fn test_stale_marker_is_discarded() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(FakeTransport::new(b"abcdefgh"));
        let prefs = Arc::new(MemoryPreferences::new());
        prefs.set("resume.org.example.app.bytes", "5").unwrap();
        prefs
            .set("resume.org.example.app.last_modified", "yesterday")
            .unwrap();
        let dl = ResumableDownloader::new(transport.clone(), prefs, temp.path());

        let path = dl
            .download(&record(), &CancellationToken::new(), &|_, _| {})
            .unwrap();

        assert_eq!(fs::read(path).unwrap(), b"abcdefgh");
        assert_eq!(transport.requests.lock()[0], None);
    }

    #[test]
    fn test_artifact_path_is_sanitized() {
        let dl = ResumableDownloader::new(
            Arc::new(FakeTransport::new(b"")),
            Arc::new(MemoryPreferences::new()),
            "/tmp/scratch",
        );
        assert_eq!(
            dl.artifact_path("org.example.app"),
            PathBuf::from("/tmp/scratch/org.example.app.pkg")
        );
        let evil = dl.artifact_path("../evil/name");
        let evil_name = evil.file_name().unwrap().to_str().unwrap();
        assert_eq!(evil.parent(), Some(Path::new("/tmp/scratch")));
        assert!(evil_name.starts_with("_evil_name-"));
        assert!(evil_name.ends_with(".pkg"));
    }

    #[test]
    fn test_artifact_path_keeps_distinct_names_apart() {
        let dl = ResumableDownloader::new(
            Arc::new(FakeTransport::new(b"")),
            Arc::new(MemoryPreferences::new()),
            "/tmp/scratch",
        );
        assert_ne!(dl.artifact_path("a/b"), dl.artifact_path("a_b"));
        assert_eq!(dl.artifact_path("a_b"), PathBuf::from("/tmp/scratch/a_b.pkg"));
        assert_eq!(dl.artifact_path("a/b"), dl.artifact_path("a/b"));
    }

    #[test]
    fn test_http_transport_rejects_disallowed_host() {
        let transport = HttpTransport::new()
            .unwrap()
            .with_allowed_hosts(HostAllowList::new(["example.org"]));
        assert!(matches!(
            transport.get("https://example.com/a.pkg", None),
            Err(TransferError::HostNotAllowed(h)) if h == "example.com"
        ));
    }

    #[test]
    fn test_http_transport_default_timeout() {
        let transport = HttpTransport::new().unwrap();
        assert_eq!(transport.timeout.as_secs(), DEFAULT_DOWNLOAD_TIMEOUT_SECS);
    }
}
