//! Sequential download and install pipeline.
//!
//! # Architecture
//!
//! ```text
//!  PackageStore::get_updates()  (apply = true, insertion order)
//!            │
//!            ▼
//!  ┌────────────────────┐  resume markers  ┌─────────────┐
//!  │ ResumableDownloader│ ◀──────────────▶ │ Preferences │
//!  └─────────┬──────────┘                  └─────────────┘
//!            │ artifact
//!            ▼
//!  ┌────────────────────┐   callback   ┌─────────────────────┐
//!  │  InstallPipeline   │ ───────────▶ │ PrivilegedInstaller │
//!  │ (CLEAN: uninstall  │ ◀─────────── │    (out-of-band)    │
//!  │  first)            │              └─────────────────────┘
//!  └─────────┬──────────┘
//!            │ verify with PackageInspector
//!            ▼
//!   remove UpdateRecord, record status, next package
//! ```
//!
//! Failures are local to a package. The pipeline keeps no state between
//! runs beyond the store and the resume markers.

mod download;
mod installer;
mod state;

pub use download::{
    HttpTransport, ResumableDownloader, ResumeMarker, TransferResponse, Transport,
    DEFAULT_DOWNLOAD_TIMEOUT_SECS,
};
pub use installer::{InstallPipeline, PipelineContext, DEFAULT_INSTALL_TIMEOUT_SECS};
pub use state::{PackageOutcome, PackageReport, PackageStage, RunSummary};
