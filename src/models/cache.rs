//! Hub cache detection utilities
//!
//! Reads the model hub's on-disk cache layout directly. Cache structure:
//! ```text
//! ~/.cache/huggingface/hub/
//! ├── models--mlx-community--Qwen3-4B-4bit/
//! │   ├── snapshots/
//! │   │   └── {revision}/
//! │   │       ├── config.json
//! │   │       └── model.safetensors
//! │   └── refs/
//! │       └── main
//! └── ...
//! ```

use crate::config::ManagerConfig;
use std::path::PathBuf;

/// Resolve the hub cache directory.
///
/// A configured override wins; otherwise checks in order:
/// 1. `$HF_HOME/hub`
/// 2. `$XDG_CACHE_HOME/huggingface/hub`
/// 3. `~/.cache/huggingface/hub`
pub fn cache_dir(config: &ManagerConfig) -> PathBuf {
    if let Some(dir) = &config.hub_cache_dir {
        return dir.clone();
    }

    if let Ok(hf_home) = std::env::var("HF_HOME") {
        return PathBuf::from(hf_home).join("hub");
    }

    if let Ok(xdg_cache) = std::env::var("XDG_CACHE_HOME") {
        return PathBuf::from(xdg_cache).join("huggingface/hub");
    }

    dirs::home_dir()
        .map(|h| h.join(".cache/huggingface/hub"))
        .unwrap_or_else(|| PathBuf::from("/tmp/huggingface/hub"))
}

/// Convert a repository id to its cache directory name
///
/// The hub uses `models--{org}--{name}`,
/// e.g. "mlx-community/Qwen3-4B-4bit" -> "models--mlx-community--Qwen3-4B-4bit"
fn repo_cache_name(repository: &str) -> String {
    format!("models--{}", repository.replace('/', "--"))
}

fn snapshots_dir(config: &ManagerConfig, repository: &str) -> PathBuf {
    cache_dir(config)
        .join(repo_cache_name(repository))
        .join("snapshots")
}

/// Whether at least one revision of the repository is cached
pub fn is_cached(config: &ManagerConfig, repository: &str) -> bool {
    local_revision(config, repository).is_some()
}

/// The locally cached revision of a repository: the name of the
/// most-recently-modified snapshot directory, or None if nothing is
/// cached.
pub fn local_revision(config: &ManagerConfig, repository: &str) -> Option<String> {
    let snapshots = snapshots_dir(config, repository);
    let entries = std::fs::read_dir(&snapshots).ok()?;

    let mut latest: Option<(std::time::SystemTime, String)> = None;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH);

        match &latest {
            Some((newest, _)) if *newest >= modified => {}
            _ => latest = Some((modified, name)),
        }
    }

    latest.map(|(_, name)| name)
}

/// Total size in bytes of a repository's cached files, or None if the
/// repository is not cached at all
pub fn cache_size(config: &ManagerConfig, repository: &str) -> Option<u64> {
    let repo_dir = cache_dir(config).join(repo_cache_name(repository));
    if !repo_dir.exists() {
        return None;
    }
    Some(dir_size(&repo_dir))
}

/// Recursively calculate directory size
fn dir_size(path: &PathBuf) -> u64 {
    let mut size = 0;

    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                size += dir_size(&path);
            } else if let Ok(metadata) = std::fs::metadata(&path) {
                size += metadata.len();
            }
        }
    }

    size
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config(dir: &std::path::Path) -> ManagerConfig {
        ManagerConfig {
            hub_cache_dir: Some(dir.to_path_buf()),
            ..Default::default()
        }
    }

    fn add_snapshot(config: &ManagerConfig, repository: &str, revision: &str) -> PathBuf {
        let dir = snapshots_dir(config, repository).join(revision);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_repo_cache_name() {
        assert_eq!(
            repo_cache_name("mlx-community/Qwen3-4B-4bit"),
            "models--mlx-community--Qwen3-4B-4bit"
        );
    }

    #[test]
    fn test_cache_dir_override() {
        let temp = tempfile::tempdir().unwrap();
        let config = temp_config(temp.path());
        assert_eq!(cache_dir(&config), temp.path());
    }

    #[test]
    fn test_local_revision_not_cached() {
        let temp = tempfile::tempdir().unwrap();
        let config = temp_config(temp.path());
        assert_eq!(local_revision(&config, "org/missing"), None);
        assert!(!is_cached(&config, "org/missing"));
    }

    #[test]
    fn test_local_revision_single_snapshot() {
        let temp = tempfile::tempdir().unwrap();
        let config = temp_config(temp.path());
        add_snapshot(&config, "org/model", "abc123");

        assert_eq!(
            local_revision(&config, "org/model"),
            Some("abc123".to_string())
        );
        assert!(is_cached(&config, "org/model"));
    }

    #[test]
    fn test_local_revision_prefers_newest() {
        let temp = tempfile::tempdir().unwrap();
        let config = temp_config(temp.path());
        add_snapshot(&config, "org/model", "abc123");
        std::thread::sleep(std::time::Duration::from_millis(20));
        add_snapshot(&config, "org/model", "def456");

        assert_eq!(
            local_revision(&config, "org/model"),
            Some("def456".to_string())
        );
    }

    #[test]
    fn test_cache_size_not_cached() {
        let temp = tempfile::tempdir().unwrap();
        let config = temp_config(temp.path());
        assert_eq!(cache_size(&config, "org/missing"), None);
    }

    #[test]
    fn test_cache_size_counts_nested_files() {
        let temp = tempfile::tempdir().unwrap();
        let config = temp_config(temp.path());
        let snap = add_snapshot(&config, "org/model", "abc123");
        std::fs::write(snap.join("config.json"), "{}").unwrap();
        std::fs::write(snap.join("weights.bin"), [0u8; 100]).unwrap();

        assert_eq!(cache_size(&config, "org/model"), Some(102));
    }
}
