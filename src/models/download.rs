//! Snapshot download and cache maintenance via the hub client
//!
//! Downloads run through the user's Python environment so the hub
//! client's own progress bars, auth and cache layout apply unchanged.
//! `snapshot_download` is idempotent: re-invoking it on a cached model is
//! a cheap cache hit, which is what `resolve_path` relies on.

use crate::catalog::ModelDefinition;
use crate::config::ManagerConfig;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

fn cache_dir_kwarg(config: &ManagerConfig) -> String {
    match &config.hub_cache_dir {
        Some(dir) => format!(", cache_dir='{}'", dir.display()),
        None => String::new(),
    }
}

/// Download (or refresh) a repository snapshot, inheriting stdio so the
/// hub client's progress output reaches the user. Returns success by
/// exit code.
pub async fn download(config: &ManagerConfig, interpreter: &str, repository: &str) -> bool {
    tracing::info!(repository = %repository, "Starting snapshot download");

    let script = format!(
        "from huggingface_hub import snapshot_download; snapshot_download(repo_id='{}'{})",
        repository,
        cache_dir_kwarg(config)
    );

    let status = Command::new(interpreter)
        .args(["-c", &script])
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await;

    match status {
        Ok(status) if status.success() => {
            tracing::info!(repository = %repository, "Snapshot download complete");
            true
        }
        Ok(status) => {
            tracing::warn!(repository = %repository, status = ?status.code(), "Snapshot download failed");
            false
        }
        Err(e) => {
            tracing::warn!(repository = %repository, error = %e, "Failed to run download");
            false
        }
    }
}

/// Resolve the on-disk path of a downloaded model.
///
/// Re-invokes the snapshot download (a cache hit for installed models)
/// to get the snapshot directory, then appends the model's optional
/// subdirectory. Returns None on any failure or timeout.
pub async fn resolve_path(
    config: &ManagerConfig,
    interpreter: &str,
    model: &ModelDefinition,
) -> Option<PathBuf> {
    let script = format!(
        "from huggingface_hub import snapshot_download; print(snapshot_download(repo_id='{}'{}))",
        model.hub_repository,
        cache_dir_kwarg(config)
    );

    let result = tokio::time::timeout(
        Duration::from_secs(config.resolve_timeout_secs),
        Command::new(interpreter)
            .args(["-c", &script])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output(),
    )
    .await;

    let output = match result {
        Ok(Ok(output)) if output.status.success() => output,
        Ok(Ok(output)) => {
            tracing::warn!(
                model = %model.id,
                stderr = %String::from_utf8_lossy(&output.stderr),
                "Path resolution failed"
            );
            return None;
        }
        Ok(Err(e)) => {
            tracing::warn!(model = %model.id, error = %e, "Failed to run path resolution");
            return None;
        }
        Err(_) => {
            tracing::warn!(model = %model.id, "Path resolution timed out");
            return None;
        }
    };

    // The snapshot path is the last stdout line; progress noise may precede it
    let stdout = String::from_utf8_lossy(&output.stdout);
    let snapshot = stdout.lines().map(str::trim).filter(|l| !l.is_empty()).next_back()?;

    let mut path = PathBuf::from(snapshot);
    if let Some(sub) = model.subdirectory {
        path = path.join(sub);
    }
    Some(path)
}

/// Delete every cached revision of a repository, best-effort. Finding no
/// matching revision is not a failure.
pub async fn clear_cache(config: &ManagerConfig, interpreter: &str, repository: &str) -> bool {
    tracing::info!(repository = %repository, "Clearing cached revisions");

    let cache_arg = match &config.hub_cache_dir {
        Some(dir) => format!("cache_dir='{}'", dir.display()),
        None => String::new(),
    };
    let script = format!(
        r#"
from huggingface_hub import scan_cache_dir
info = scan_cache_dir({})
revisions = [
    rev.commit_hash
    for repo in info.repos
    if repo.repo_id == '{}'
    for rev in repo.revisions
]
if revisions:
    info.delete_revisions(*revisions).execute()
"#,
        cache_arg, repository
    );

    let output = Command::new(interpreter)
        .args(["-c", &script])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await;

    match output {
        Ok(output) if output.status.success() => true,
        Ok(output) => {
            tracing::warn!(
                repository = %repository,
                status = ?output.status.code(),
                stderr = %String::from_utf8_lossy(&output.stderr),
                "Cache clear failed"
            );
            false
        }
        Err(e) => {
            tracing::warn!(repository = %repository, error = %e, "Failed to run cache clear");
            false
        }
    }
}
