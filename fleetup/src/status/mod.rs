//! Operator-facing state: events, the status board and the package info
//! cache.
//!
//! - [`EventSink`]: one-way notifications to whatever UI is attached
//! - [`StatusBoard`]: latest info/error/download messages with timestamps
//! - [`PackageInfoCache`]: per-package installed vs. available versions

mod board;
mod cache;
mod events;

pub use board::{StampedMessage, StatusBoard, StatusSnapshot};
pub use cache::{PackageInfo, PackageInfoCache, VersionState};
pub use events::{ChannelSink, Event, EventKind, EventSink, LogSink, NullSink};
