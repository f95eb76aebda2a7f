//! What one reconciliation changed.

/// Changes made by one reconciliation, by package name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Whether the managed flag changed and pending updates were purged.
    pub flag_changed: bool,
    /// Pending updates removed by the purge.
    pub purged: usize,
    /// Packages queued with `apply` set.
    pub queued: Vec<String>,
    /// Packages queued as optional updates (`apply` unset).
    pub optional: Vec<String>,
    /// Packages newly brought under management.
    pub managed: Vec<String>,
    /// Packages whose pending update was dropped as up to date.
    pub current: Vec<String>,
    /// Managed packages the manifest no longer lists.
    pub unmanaged: Vec<String>,
    /// Descriptors skipped because a store operation failed.
    pub skipped: Vec<String>,
}

impl ReconcileReport {
    /// Whether the pipeline has work to do.
    pub fn has_actionable(&self) -> bool {
        !self.queued.is_empty()
    }

    /// Whether the store was left unchanged apart from stale entries.
    pub fn is_quiet(&self) -> bool {
        !self.flag_changed
            && self.queued.is_empty()
            && self.optional.is_empty()
            && self.managed.is_empty()
            && self.unmanaged.is_empty()
    }
}
