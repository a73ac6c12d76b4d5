//! Python prerequisite probing
//!
//! The inference engine and hub client live in the user's Python
//! environment; this module detects a usable interpreter and checks or
//! installs the packages the manager needs. Every subprocess carries an
//! explicit timeout so a hung interpreter cannot stall the caller.

use crate::config::ManagerConfig;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of importing a module inside a short-lived subprocess
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportCheck {
    Ok,
    /// Import failed; carries the interpreter's stderr
    Failed(String),
    TimedOut,
}

impl ImportCheck {
    pub fn is_ok(&self) -> bool {
        matches!(self, ImportCheck::Ok)
    }
}

/// Find a usable Python 3 interpreter.
///
/// Tries the configured candidate names in order and accepts the first
/// one whose `--version` reports a 3.x version string.
pub async fn find_interpreter(config: &ManagerConfig) -> Option<String> {
    for candidate in &config.interpreter_candidates {
        let result = tokio::time::timeout(
            VERSION_PROBE_TIMEOUT,
            Command::new(candidate)
                .arg("--version")
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await;

        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(_)) | Err(_) => continue,
        };

        // Old interpreters print the version on stderr
        let text = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        if output.status.success() && text.contains("Python 3.") {
            tracing::debug!(interpreter = %candidate, version = %text.trim(), "Found interpreter");
            return Some(candidate.clone());
        }
    }

    tracing::debug!("No Python 3 interpreter found");
    None
}

/// Attempt `import {module}` in a subprocess, capturing the failure text
pub async fn check_import(interpreter: &str, module: &str, timeout: Duration) -> ImportCheck {
    let result = tokio::time::timeout(
        timeout,
        Command::new(interpreter)
            .arg("-c")
            .arg(format!("import {}", module))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output(),
    )
    .await;

    match result {
        Ok(Ok(output)) if output.status.success() => ImportCheck::Ok,
        Ok(Ok(output)) => ImportCheck::Failed(String::from_utf8_lossy(&output.stderr).to_string()),
        Ok(Err(e)) => ImportCheck::Failed(e.to_string()),
        Err(_) => {
            tracing::warn!(module = %module, timeout = ?timeout, "Import check timed out");
            ImportCheck::TimedOut
        }
    }
}

/// Whether a module is importable with the configured check timeout
pub async fn has_package(config: &ManagerConfig, interpreter: &str, module: &str) -> bool {
    let timeout = Duration::from_secs(config.import_check_timeout_secs);
    check_import(interpreter, module, timeout).await.is_ok()
}

/// Install a package with pip, inheriting stdio so the user sees
/// progress. Returns whether pip exited successfully.
pub async fn install_package(interpreter: &str, pip_name: &str) -> bool {
    tracing::info!(package = %pip_name, "Installing package");

    let status = Command::new(interpreter)
        .args(["-m", "pip", "install", pip_name])
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await;

    match status {
        Ok(status) if status.success() => true,
        Ok(status) => {
            tracing::warn!(package = %pip_name, status = ?status.code(), "pip install failed");
            false
        }
        Err(e) => {
            tracing::warn!(package = %pip_name, error = %e, "Failed to run pip");
            false
        }
    }
}

/// Force-reinstall a package, bypassing the wheel cache. Used by the
/// repair loop to replace a wrong-architecture build.
pub async fn force_reinstall_package(interpreter: &str, pip_name: &str) -> bool {
    tracing::info!(package = %pip_name, "Force-reinstalling package");

    let status = Command::new(interpreter)
        .args([
            "-m",
            "pip",
            "install",
            "--force-reinstall",
            "--no-cache-dir",
            pip_name,
        ])
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await;

    matches!(status, Ok(s) if s.success())
}
