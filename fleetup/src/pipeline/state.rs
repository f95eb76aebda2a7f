//! Per-run pipeline state.

use std::fmt;

/// Stage a package is in while the pipeline works on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageStage {
    /// Fetching the artifact.
    Downloading,
    /// Removing the installed package ahead of a clean install.
    Uninstalling,
    /// Waiting for the privileged installer.
    Installing,
    /// Checking the installed version.
    Verifying,
    /// Done with this package.
    Complete,
}

impl PackageStage {
    /// Get a human-readable name for the stage.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Downloading => "Downloading",
            Self::Uninstalling => "Uninstalling",
            Self::Installing => "Installing",
            Self::Verifying => "Verifying",
            Self::Complete => "Complete",
        }
    }
}

impl fmt::Display for PackageStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How processing one package ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageOutcome {
    /// Installed and verified; the pending update was removed.
    Installed { version: u32 },
    /// The artifact could not be downloaded.
    DownloadFailed(String),
    /// The uninstall step of a clean install failed.
    UninstallFailed(String),
    /// The installer failed or did not report.
    InstallFailed(String),
    /// The installer succeeded but the version does not match.
    VerificationFailed(String),
    /// A kill request stopped work on the package.
    Cancelled,
}

impl PackageOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Installed { .. })
    }

    pub fn is_failure(&self) -> bool {
        !self.is_success() && !matches!(self, Self::Cancelled)
    }
}

impl fmt::Display for PackageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Installed { version } => write!(f, "installed version {}", version),
            Self::DownloadFailed(reason) => write!(f, "download failed: {}", reason),
            Self::UninstallFailed(reason) => write!(f, "uninstall failed: {}", reason),
            Self::InstallFailed(reason) => write!(f, "install failed: {}", reason),
            Self::VerificationFailed(reason) => write!(f, "verification failed: {}", reason),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Outcome for one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageReport {
    pub package: String,
    pub outcome: PackageOutcome,
}

/// Result of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Reports in processing order.
    pub reports: Vec<PackageReport>,
    /// Whether the run stopped on a kill request.
    pub cancelled: bool,
}

impl RunSummary {
    /// Record the outcome for a package.
    pub fn record(&mut self, package: impl Into<String>, outcome: PackageOutcome) {
        if matches!(outcome, PackageOutcome::Cancelled) {
            self.cancelled = true;
        }
        self.reports.push(PackageReport {
            package: package.into(),
            outcome,
        });
    }

    /// Whether nothing was processed.
    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    /// Names of packages installed in this run.
    pub fn installed(&self) -> Vec<&str> {
        self.reports
            .iter()
            .filter(|r| r.outcome.is_success())
            .map(|r| r.package.as_str())
            .collect()
    }

    /// Reports for packages that failed.
    pub fn failures(&self) -> Vec<&PackageReport> {
        self.reports
            .iter()
            .filter(|r| r.outcome.is_failure())
            .collect()
    }

    pub fn has_failures(&self) -> bool {
        self.reports.iter().any(|r| r.outcome.is_failure())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        assert_eq!(PackageStage::Downloading.name(), "Downloading");
        assert_eq!(PackageStage::Verifying.to_string(), "Verifying");
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = RunSummary::default();
        assert!(summary.is_empty());

        summary.record("a", PackageOutcome::Installed { version: 2 });
        summary.record("b", PackageOutcome::DownloadFailed("reset".into()));
        summary.record("c", PackageOutcome::Cancelled);

        assert_eq!(summary.installed(), vec!["a"]);
        assert_eq!(summary.failures().len(), 1);
        assert_eq!(summary.failures()[0].package, "b");
        assert!(summary.has_failures());
        assert!(summary.cancelled);
    }
}
