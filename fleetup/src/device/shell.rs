//! Package manager driven through the `pm` shell command.

use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::thread;

use super::{
    CompletionCallback, InstallReport, PackageInspector, PrivilegedInstaller,
    RETURN_FAILED_INTERNAL, RETURN_SUCCEEDED,
};
use crate::error::InstallError;

/// Default package manager command.
pub const DEFAULT_PM_COMMAND: &str = "pm";

/// Known failure reasons and their return codes.
const FAILURE_CODES: &[(&str, i32)] = &[
    ("INSTALL_FAILED_ALREADY_EXISTS", -1),
    ("INSTALL_FAILED_INVALID_APK", -2),
    ("INSTALL_FAILED_INVALID_URI", -3),
    ("INSTALL_FAILED_INSUFFICIENT_STORAGE", -4),
    ("INSTALL_FAILED_DUPLICATE_PACKAGE", -5),
    ("INSTALL_FAILED_UPDATE_INCOMPATIBLE", -7),
    ("INSTALL_FAILED_OLDER_SDK", -12),
    ("INSTALL_FAILED_VERSION_DOWNGRADE", -25),
    ("DELETE_FAILED_INTERNAL_ERROR", -1),
    ("DELETE_FAILED_DEVICE_POLICY_MANAGER", -2),
    ("DELETE_FAILED_OWNER_BLOCKED", -4),
];

/// Shell-based package manager.
///
/// Runs `pm install -r`, `pm uninstall` and `pm list packages` with the
/// configured program. Install and uninstall run on a background thread and
/// report through the completion callback.
#[derive(Debug, Clone)]
pub struct PmShell {
    program: String,
}

impl Default for PmShell {
    fn default() -> Self {
        Self::new(DEFAULT_PM_COMMAND)
    }
}

impl PmShell {
    /// Create a shell package manager using `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Program being run.
    pub fn program(&self) -> &str {
        &self.program
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }

    /// Start `command` and deliver its outcome to `on_complete` from a worker
    /// thread.
    fn run_async(
        &self,
        mut command: Command,
        package: &str,
        operation: &'static str,
        on_complete: CompletionCallback,
    ) -> Result<(), InstallError> {
        let spawn_failed = |e| InstallError::Spawn {
            command: format!("{} {}", self.program, operation),
            source: e,
        };

        let child = command.spawn().map_err(spawn_failed)?;
        let package = package.to_string();

        tracing::info!(package = %package, operation, "Started package manager");

        thread::Builder::new()
            .name(format!("pm-{}", operation))
            .spawn(move || {
                let report = match child.wait_with_output() {
                    Ok(output) => report_from_output(&package, &output),
                    Err(e) => InstallReport::new(&package, RETURN_FAILED_INTERNAL, e.to_string()),
                };
                tracing::info!(
                    package = %report.package,
                    operation,
                    return_code = report.return_code,
                    message = %report.message,
                    "Package manager finished"
                );
                on_complete(report);
            })
            .map_err(spawn_failed)?;

        Ok(())
    }
}

fn report_from_output(package: &str, output: &Output) -> InstallReport {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push('\n');
    text.push_str(&String::from_utf8_lossy(&output.stderr));

    let (return_code, message) = parse_pm_output(&text);
    InstallReport::new(package, return_code, message)
}

/// Map `pm install`/`pm uninstall` output to a return code and message.
///
/// `Success` maps to [`RETURN_SUCCEEDED`]; `Failure [REASON]` maps to the
/// known code for `REASON` (or [`RETURN_FAILED_INTERNAL`]) with the reason
/// as the message.
pub fn parse_pm_output(output: &str) -> (i32, String) {
    for line in output.lines().map(str::trim) {
        if line.starts_with("Success") {
            return (RETURN_SUCCEEDED, "Success".to_string());
        }
        if let Some(rest) = line.strip_prefix("Failure") {
            let reason = rest
                .trim()
                .trim_start_matches('[')
                .split(']')
                .next()
                .unwrap_or_default()
                .trim();
            let code = reason
                .split(|c: char| c == ':' || c.is_whitespace())
                .next()
                .and_then(|name| FAILURE_CODES.iter().find(|(known, _)| *known == name))
                .map(|(_, code)| *code)
                .unwrap_or(RETURN_FAILED_INTERNAL);
            return (code, reason.to_string());
        }
    }

    let trimmed = output.trim();
    let message = if trimmed.is_empty() {
        "no output from package manager".to_string()
    } else {
        trimmed.to_string()
    };
    (RETURN_FAILED_INTERNAL, message)
}

/// Find the version code of `name` in `pm list packages --show-versioncode`
/// output.
///
/// The listing filter matches substrings, so only an exact
/// `package:<name>` entry counts.
pub fn parse_version_listing(output: &str, name: &str) -> Option<u32> {
    output.lines().find_map(|line| {
        let mut tokens = line.split_whitespace();
        let package = tokens.next()?.strip_prefix("package:")?;
        if package != name {
            return None;
        }
        tokens
            .find_map(|t| t.strip_prefix("versionCode:"))
            .and_then(|v| v.parse().ok())
    })
}

impl PackageInspector for PmShell {
    fn installed_version(&self, name: &str) -> Result<Option<u32>, InstallError> {
        let output = self
            .command(&["list", "packages", "--show-versioncode", name])
            .output()
            .map_err(|e| {
                tracing::error!(package = name, error = %e, "Failed to query package manager");
                InstallError::Spawn {
                    command: format!("{} list packages", self.program),
                    source: e,
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::error!(package = name, status = %output.status, stderr = %stderr, "Package query failed");
            return Err(InstallError::Query {
                package: name.to_string(),
                reason: format!("{} {}", output.status, stderr).trim().to_string(),
            });
        }

        let listing = String::from_utf8_lossy(&output.stdout);
        let version = parse_version_listing(&listing, name);
        tracing::debug!(package = name, ?version, "Queried installed version");
        Ok(version)
    }
}

impl PrivilegedInstaller for PmShell {
    fn install(
        &self,
        package: &str,
        artifact: &Path,
        on_complete: CompletionCallback,
    ) -> Result<(), InstallError> {
        let mut command = self.command(&["install", "-r"]);
        command.arg(artifact);
        self.run_async(command, package, "install", on_complete)
    }

    fn uninstall(&self, package: &str, on_complete: CompletionCallback) -> Result<(), InstallError> {
        let command = self.command(&["uninstall", package]);
        self.run_async(command, package, "uninstall", on_complete)
    }
}
