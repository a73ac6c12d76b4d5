//! Repair loop for architecture-mismatched native extensions
//!
//! On Apple Silicon a package can arrive with x86_64 compiled extensions
//! and fail at import time. The loop reads the import error, identifies
//! the offending installed package, and force-reinstalls it without the
//! wheel cache, repeating until the import succeeds or nothing further
//! can be fixed.

use crate::config::ManagerConfig;
use crate::python::{self, ImportCheck};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;

/// Upper bound on repair iterations for a single module
const MAX_REPAIR_ATTEMPTS: u32 = 30;

/// Error-text fragments that identify a repairable architecture mismatch
const MISMATCH_SIGNATURES: &[&str] = &["incompatible architecture", "not been built correctly"];

/// Installed-directory names whose pip distribution is named differently
const PIP_NAME_ALIASES: &[(&str, &str)] = &[
    ("PIL", "pillow"),
    ("yaml", "pyyaml"),
    ("sklearn", "scikit-learn"),
    ("cv2", "opencv-python"),
    ("Crypto", "pycryptodome"),
];

/// Result of a repair run
#[derive(Debug, Clone, Default)]
pub struct RepairReport {
    /// Whether the module imported cleanly when the loop stopped
    pub import_ok: bool,
    /// Pip names of packages that were successfully reinstalled
    pub reinstalled: Vec<String>,
}

/// Whether this build targets Apple Silicon. The repair loop is only
/// meaningful there; other platforms never see these import failures.
pub fn is_apple_silicon() -> bool {
    cfg!(all(target_os = "macos", target_arch = "aarch64"))
}

fn site_packages_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"site-packages/([A-Za-z0-9_.\-]+)/").unwrap())
}

fn not_built_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([A-Za-z0-9_.]+) has not been built correctly").unwrap())
}

/// Whether the import error text matches a known repairable shape
pub fn is_arch_mismatch(error_text: &str) -> bool {
    MISMATCH_SIGNATURES.iter().any(|s| error_text.contains(s))
}

/// Extract the offending installed package directory from an import
/// error. Handles the two shapes seen in the wild: a dlopen failure
/// naming the extension's site-packages path, and the engine's own
/// "X has not been built correctly" message.
pub fn offending_package(error_text: &str) -> Option<String> {
    if let Some(caps) = site_packages_re().captures(error_text) {
        let dir = &caps[1];
        // A dotted name points inside a package; keep the top level
        return Some(dir.split('.').next().unwrap_or(dir).to_string());
    }

    not_built_re()
        .captures(error_text)
        .map(|caps| caps[1].split('.').next().unwrap_or(&caps[1]).to_string())
}

/// Map an installed-directory name to the name pip installs it under.
/// Unknown names fall back to substituting underscores with hyphens.
pub fn pip_name_for(dir_name: &str) -> String {
    for (dir, pip) in PIP_NAME_ALIASES {
        if *dir == dir_name {
            return (*pip).to_string();
        }
    }
    dir_name.replace('_', "-")
}

/// Attempt to make `module` importable by reinstalling broken native
/// packages one at a time.
///
/// Stops on: clean import, an error that is not an architecture
/// mismatch, an error it cannot attribute to a package, a package it
/// already tried this run, or a failed reinstall. The conservative stops
/// avoid guessing at packages the mapping does not know.
pub async fn repair_native_packages(
    config: &ManagerConfig,
    interpreter: &str,
    module: &str,
) -> RepairReport {
    let timeout = Duration::from_secs(config.import_check_timeout_secs);
    let mut report = RepairReport::default();
    let mut attempted: HashSet<String> = HashSet::new();

    for attempt in 0..MAX_REPAIR_ATTEMPTS {
        let error_text = match python::check_import(interpreter, module, timeout).await {
            ImportCheck::Ok => {
                report.import_ok = true;
                if !report.reinstalled.is_empty() {
                    tracing::info!(
                        module = %module,
                        reinstalled = ?report.reinstalled,
                        "Import repaired"
                    );
                }
                return report;
            }
            ImportCheck::Failed(stderr) => stderr,
            ImportCheck::TimedOut => {
                tracing::warn!(module = %module, "Import check timed out during repair");
                return report;
            }
        };

        if !is_arch_mismatch(&error_text) {
            tracing::warn!(
                module = %module,
                "Import failure is not an architecture mismatch, stopping repair"
            );
            return report;
        }

        let Some(package_dir) = offending_package(&error_text) else {
            tracing::warn!(module = %module, "Could not attribute import failure to a package");
            return report;
        };

        if !attempted.insert(package_dir.clone()) {
            tracing::warn!(
                package = %package_dir,
                "Package already reinstalled this run, stopping repair"
            );
            return report;
        }

        let pip_name = pip_name_for(&package_dir);
        tracing::info!(
            attempt = attempt + 1,
            package = %pip_name,
            "Reinstalling package with broken native extension"
        );

        if !python::force_reinstall_package(interpreter, &pip_name).await {
            tracing::warn!(package = %pip_name, "Reinstall failed, stopping repair");
            return report;
        }

        report.reinstalled.push(pip_name);
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    const DLOPEN_ERROR: &str = "ImportError: dlopen(/Users/u/lib/python3.11/site-packages/tokenizers/tokenizers.cpython-311-darwin.so, 0x0002): tried: '...' (mach-o file, but is an incompatible architecture (have 'x86_64', need 'arm64'))";

    #[test]
    fn test_is_arch_mismatch() {
        assert!(is_arch_mismatch(DLOPEN_ERROR));
        assert!(is_arch_mismatch("numpy has not been built correctly"));
        assert!(!is_arch_mismatch(
            "ModuleNotFoundError: No module named 'mlx_lm'"
        ));
    }

    #[test]
    fn test_offending_package_from_dlopen_shape() {
        assert_eq!(
            offending_package(DLOPEN_ERROR),
            Some("tokenizers".to_string())
        );
    }

    #[test]
    fn test_offending_package_from_not_built_shape() {
        assert_eq!(
            offending_package("ImportError: PIL has not been built correctly"),
            Some("PIL".to_string())
        );
    }

    #[test]
    fn test_offending_package_unknown_shape() {
        assert_eq!(offending_package("SyntaxError: invalid syntax"), None);
    }

    #[test]
    fn test_pip_name_aliases() {
        assert_eq!(pip_name_for("PIL"), "pillow");
        assert_eq!(pip_name_for("yaml"), "pyyaml");
        assert_eq!(pip_name_for("sklearn"), "scikit-learn");
    }

    #[test]
    fn test_pip_name_underscore_heuristic() {
        assert_eq!(pip_name_for("ruamel_yaml"), "ruamel-yaml");
        assert_eq!(pip_name_for("tokenizers"), "tokenizers");
    }

    #[cfg(unix)]
    fn fake_interpreter(dir: &std::path::Path, script: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fakepython");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_repair_reinstalls_aliased_pip_name() {
        let temp = tempfile::tempdir().unwrap();
        let pip_log = temp.path().join("pip.log");
        // Imports always fail blaming PIL; pip invocations are recorded.
        // The second sighting of PIL must stop the loop.
        let script = format!(
            r#"if [ "$1" = "-c" ]; then echo "ImportError: PIL has not been built correctly" >&2; exit 1; fi
echo "$@" >> {}; exit 0"#,
            pip_log.display()
        );
        let fake = fake_interpreter(temp.path(), &script);
        let config = ManagerConfig::default();

        let report = repair_native_packages(&config, &fake, "mlx_lm").await;
        assert!(!report.import_ok);
        assert_eq!(report.reinstalled, vec!["pillow"]);

        let log = std::fs::read_to_string(&pip_log).unwrap();
        assert!(log.contains("pillow"));
        assert!(!log.contains("PIL"));
        // Exactly one reinstall despite the repeating error
        assert_eq!(log.lines().count(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_repair_stops_on_unrelated_error() {
        let temp = tempfile::tempdir().unwrap();
        let fake = fake_interpreter(
            temp.path(),
            r#"echo "ModuleNotFoundError: No module named 'mlx_lm'" >&2; exit 1"#,
        );
        let config = ManagerConfig::default();

        let report = repair_native_packages(&config, &fake, "mlx_lm").await;
        assert!(!report.import_ok);
        assert!(report.reinstalled.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_repair_noop_when_import_works() {
        let temp = tempfile::tempdir().unwrap();
        let fake = fake_interpreter(temp.path(), "exit 0");
        let config = ManagerConfig::default();

        let report = repair_native_packages(&config, &fake, "mlx_lm").await;
        assert!(report.import_ok);
        assert!(report.reinstalled.is_empty());
    }
}
