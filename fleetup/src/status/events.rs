//! Event notifications.

use std::fmt;
use std::sync::mpsc::Sender;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Kinds of events reported to the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A manifest check started.
    CheckStarted,
    /// A manifest check failed.
    CheckFailed,
    /// Updates are queued but not installed automatically.
    UpdatesAvailable,
    /// A download failed.
    DownloadFailed,
    /// A package was installed and verified.
    Installed,
    /// An install, uninstall or verification failed.
    InstallFailed,
    /// A package was uninstalled ahead of a clean install.
    Uninstalled,
    /// The previous self-update did not complete.
    SelfUpdateFailed,
    /// A pending removal was confirmed.
    RemovalConfirmed,
    /// Package info should be reloaded.
    CacheRefreshed,
    /// The run was stopped by a kill request.
    RunCancelled,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckStarted => "check-started",
            Self::CheckFailed => "check-failed",
            Self::UpdatesAvailable => "updates-available",
            Self::DownloadFailed => "download-failed",
            Self::Installed => "installed",
            Self::InstallFailed => "install-failed",
            Self::Uninstalled => "uninstalled",
            Self::SelfUpdateFailed => "self-update-failed",
            Self::RemovalConfirmed => "removal-confirmed",
            Self::CacheRefreshed => "cache-refreshed",
            Self::RunCancelled => "run-cancelled",
        }
    }

    /// Whether the event reports a failure.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::CheckFailed | Self::DownloadFailed | Self::InstallFailed | Self::SelfUpdateFailed
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A delivered event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    pub kind: EventKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// One-way notification surface.
///
/// Implementations must not block the caller.
pub trait EventSink: Send + Sync {
    fn notify(&self, kind: EventKind, message: &str);
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn notify(&self, _kind: EventKind, _message: &str) {}
}

/// Sink that writes events to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn notify(&self, kind: EventKind, message: &str) {
        if kind.is_failure() {
            tracing::warn!(event = %kind, "{}", message);
        } else {
            tracing::info!(event = %kind, "{}", message);
        }
    }
}

/// Sink that forwards events over a channel.
///
/// A disconnected receiver is ignored.
pub struct ChannelSink {
    sender: Mutex<Sender<Event>>,
}

impl ChannelSink {
    pub fn new(sender: Sender<Event>) -> Self {
        Self {
            sender: Mutex::new(sender),
        }
    }
}

impl EventSink for ChannelSink {
    fn notify(&self, kind: EventKind, message: &str) {
        let event = Event {
            kind,
            message: message.to_string(),
            at: Utc::now(),
        };
        let _ = self.sender.lock().send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_channel_sink_delivers() {
        let (tx, rx) = mpsc::channel();
        let sink = ChannelSink::new(tx);
        sink.notify(EventKind::Installed, "a installed");

        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, EventKind::Installed);
        assert_eq!(event.message, "a installed");
    }

    #[test]
    fn test_channel_sink_ignores_closed_receiver() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        ChannelSink::new(tx).notify(EventKind::CheckStarted, "ignored");
    }

    #[test]
    fn test_failure_kinds() {
        assert!(EventKind::DownloadFailed.is_failure());
        assert!(!EventKind::CacheRefreshed.is_failure());
        assert_eq!(EventKind::SelfUpdateFailed.to_string(), "self-update-failed");
    }
}
