//! Device-side collaborators: the package manager and the privileged
//! installer.
//!
//! Both are traits so the pipeline and reconciler can run against fakes.
//! [`PmShell`] implements them by driving the device's `pm` command.

mod shell;

use std::path::Path;

use crate::error::InstallError;

pub use shell::{parse_pm_output, parse_version_listing, PmShell, DEFAULT_PM_COMMAND};

/// Return code reported for a successful install or uninstall.
pub const RETURN_SUCCEEDED: i32 = 1;

/// Return code reported when the failure reason is not recognized.
pub const RETURN_FAILED_INTERNAL: i32 = -110;

/// Installed package facts.
///
/// "Not installed" is an ordinary answer (`Ok(None)`). `Err` means the
/// package manager could not be asked, and callers must not read it as
/// "not installed".
pub trait PackageInspector: Send + Sync {
    /// Installed version code, or `None` when the package is not installed.
    fn installed_version(&self, name: &str) -> Result<Option<u32>, InstallError>;

    /// Whether the package is installed.
    fn is_installed(&self, name: &str) -> Result<bool, InstallError> {
        Ok(self.installed_version(name)?.is_some())
    }
}

/// Outcome of one installer operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    /// Package the operation was for.
    pub package: String,
    /// Installer return code; [`RETURN_SUCCEEDED`] means success.
    pub return_code: i32,
    /// Installer message.
    pub message: String,
}

impl InstallReport {
    pub fn new(package: impl Into<String>, return_code: i32, message: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            return_code,
            message: message.into(),
        }
    }

    /// Successful report.
    pub fn success(package: impl Into<String>) -> Self {
        Self::new(package, RETURN_SUCCEEDED, "Success")
    }

    /// Whether the operation succeeded.
    pub fn succeeded(&self) -> bool {
        self.return_code == RETURN_SUCCEEDED
    }

    /// Convert a failed report into an error.
    pub fn into_result(self) -> Result<(), InstallError> {
        if self.succeeded() {
            Ok(())
        } else {
            Err(InstallError::Rejected {
                package: self.package,
                code: self.return_code,
                message: self.message,
            })
        }
    }
}

/// Callback receiving the outcome of an installer operation.
pub type CompletionCallback = Box<dyn FnOnce(InstallReport) + Send + 'static>;

/// Asynchronous privileged installer.
///
/// The callback is handed over with the call and invoked exactly once, on
/// any thread, when the operation finishes. An `Err` return means the
/// operation was never started and the callback will not run.
pub trait PrivilegedInstaller: Send + Sync {
    /// Install the artifact at `artifact` for `package`.
    fn install(
        &self,
        package: &str,
        artifact: &Path,
        on_complete: CompletionCallback,
    ) -> Result<(), InstallError>;

    /// Uninstall `package`.
    fn uninstall(&self, package: &str, on_complete: CompletionCallback) -> Result<(), InstallError>;
}
