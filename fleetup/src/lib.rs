//! fleetup - auto-update agent for managed devices
//!
//! The agent periodically asks a manifest server which packages this device
//! should run, reconciles that against what is installed, and drives a
//! sequential download → install pipeline to close the gap. It also keeps
//! track of updates to itself.
//!
//! # Architecture
//!
//! ```text
//!  Scheduler ──▶ Agent::run_cycle
//!                   │
//!                   ├─▶ ManifestSource::fetch_manifest ─▶ Reconciler
//!                   │                                        │
//!                   │                                        ▼
//!                   │                                   PackageStore
//!                   │                     (pending updates, managed packages,
//!                   │                      pending removals, session flags)
//!                   │                                        │
//!                   └─▶ InstallPipeline ◀────────────────────┘
//!                          │  ResumableDownloader, PrivilegedInstaller
//!                          ▼
//!                    StatusBoard / EventSink
//! ```
//!
//! # Modules
//!
//! - [`store`]: SQLite-backed package state
//! - [`manifest`]: manifest request, HTTP client and response parsing
//! - [`reconcile`]: the per-package decision algorithm
//! - [`pipeline`]: resumable downloads and the install state machine
//! - [`scheduler`]: trigger throttling and the retry policy
//! - [`agent`]: wires everything together

pub mod agent;
pub mod config;
pub mod device;
pub mod error;
pub mod logging;
pub mod manifest;
pub mod package;
pub mod pipeline;
pub mod preferences;
pub mod reconcile;
pub mod scheduler;
pub mod status;
pub mod store;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use agent::{Agent, AgentConfig, CycleReport, TriggerOutcome};
pub use error::{UpdaterError, UpdaterResult};
pub use package::{Action, PackageRef, UpdateRecord};
