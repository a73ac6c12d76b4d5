//! Persistence for the installation state document
//!
//! Every mutation is a read-modify-write of the whole document. Readers
//! treat a missing or corrupt file as "no models installed" so the tool
//! stays usable after a partial write or a manual edit.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;

// ============================================================================
// Trait Definitions
// ============================================================================

/// Trait for storage backend operations
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Save content to a file path atomically
    async fn save(&self, path: &Path, content: &str) -> Result<()>;

    /// Load content from a file path
    /// Returns None if file doesn't exist
    async fn load(&self, path: &Path) -> Result<Option<String>>;

    /// Remove a file, tolerating its absence
    async fn remove(&self, path: &Path) -> Result<()>;
}

// ============================================================================
// Production Implementation
// ============================================================================

/// Production storage backend using tokio::fs
pub struct FileSystemStorage;

impl FileSystemStorage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FileSystemStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for FileSystemStorage {
    async fn save(&self, path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create document directory")?;
        }

        // Atomic write: write to temp file, then rename
        let temp_file = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_file)
            .await
            .context("Failed to create temp document file")?;
        file.write_all(content.as_bytes())
            .await
            .context("Failed to write document file")?;
        file.sync_all()
            .await
            .context("Failed to sync document file")?;

        fs::rename(&temp_file, path)
            .await
            .context("Failed to rename temp document file")?;

        Ok(())
    }

    async fn load(&self, path: &Path) -> Result<Option<String>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read document file: {:?}", path))?;

        Ok(Some(content))
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove file: {:?}", path)),
        }
    }
}

// ============================================================================
// Installation State
// ============================================================================

/// Persisted record of installed models and the active selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallState {
    /// Installed model ids in install order
    pub installed: Vec<String>,
    /// Active model id; only meaningful while it remains installed
    pub active: Option<String>,
    pub last_updated: Option<chrono::DateTime<chrono::Utc>>,
}

/// Store for the installation state document
pub struct InstallStore {
    state_file: PathBuf,
    storage: Arc<dyn StorageBackend>,
}

impl InstallStore {
    /// Create a store with a custom storage backend
    pub fn new_with_storage(state_file: PathBuf, storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            state_file,
            storage,
        }
    }

    /// Create a store backed by the filesystem
    pub fn new(state_file: PathBuf) -> Self {
        Self::new_with_storage(state_file, Arc::new(FileSystemStorage::new()))
    }

    /// Load the current state; a missing or unparseable document is an
    /// empty state, never an error.
    pub async fn state(&self) -> InstallState {
        let content = match self.storage.load(&self.state_file).await {
            Ok(Some(c)) => c,
            Ok(None) => return InstallState::default(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read install state, treating as empty");
                return InstallState::default();
            }
        };

        match serde_json::from_str(&content) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(error = %e, "Corrupt install state, treating as empty");
                InstallState::default()
            }
        }
    }

    async fn save(&self, mut state: InstallState) -> Result<()> {
        state.last_updated = Some(chrono::Utc::now());
        let content =
            serde_json::to_string_pretty(&state).context("Failed to serialize install state")?;
        self.storage.save(&self.state_file, &content).await?;

        tracing::debug!(
            path = ?self.state_file,
            installed = state.installed.len(),
            active = ?state.active,
            "Install state saved"
        );
        Ok(())
    }

    /// Installed model ids in install order
    pub async fn list_installed(&self) -> Vec<String> {
        self.state().await.installed
    }

    pub async fn is_installed(&self, id: &str) -> bool {
        self.state().await.installed.iter().any(|m| m == id)
    }

    /// The active model id. A recorded id that is no longer installed is
    /// stale; fall back to the first installed model.
    pub async fn get_active(&self) -> Option<String> {
        let state = self.state().await;
        match state.active {
            Some(id) if state.installed.iter().any(|m| m == &id) => Some(id),
            _ => state.installed.first().cloned(),
        }
    }

    /// Record a model as installed. Idempotent; the first install becomes
    /// active if nothing is active yet.
    pub async fn mark_installed(&self, id: &str) -> Result<()> {
        let mut state = self.state().await;

        if !state.installed.iter().any(|m| m == id) {
            state.installed.push(id.to_string());
        }
        if state.active.is_none() {
            state.active = Some(id.to_string());
        }

        self.save(state).await
    }

    /// Remove a model from the installed set, reassigning the active
    /// model if it was the one removed.
    pub async fn mark_uninstalled(&self, id: &str) -> Result<()> {
        let mut state = self.state().await;

        state.installed.retain(|m| m != id);
        if state.active.as_deref() == Some(id) {
            state.active = state.installed.first().cloned();
        }

        self.save(state).await
    }

    /// Set the active model. A no-op for ids that are not installed.
    pub async fn set_active(&self, id: &str) -> Result<()> {
        let mut state = self.state().await;

        if !state.installed.iter().any(|m| m == id) {
            tracing::debug!(model = %id, "Ignoring set_active for model that is not installed");
            return Ok(());
        }

        state.active = Some(id.to_string());
        self.save(state).await
    }
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================


#[cfg(test)]
mod tests {
    use super::mocks::MemoryStorage;
    use super::*;

    fn mem_store() -> (InstallStore, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let store =
            InstallStore::new_with_storage(PathBuf::from("/mem/installed.json"), storage.clone());
        (store, storage)
    }

    #[tokio::test]
    async fn test_empty_state_when_file_absent() {
        let (store, _) = mem_store();
        assert!(store.list_installed().await.is_empty());
        assert_eq!(store.get_active().await, None);
        assert!(!store.is_installed("qwen3-4b").await);
    }

    #[tokio::test]
    async fn test_corrupt_state_treated_as_empty() {
        let (store, storage) = mem_store();
        storage
            .put(Path::new("/mem/installed.json"), "{not json!")
            .await;
        assert!(store.list_installed().await.is_empty());
        assert_eq!(store.get_active().await, None);
    }

    #[tokio::test]
    async fn test_first_install_becomes_active() {
        let (store, _) = mem_store();
        store.mark_installed("m-small").await.unwrap();

        assert_eq!(store.list_installed().await, vec!["m-small"]);
        assert_eq!(store.get_active().await, Some("m-small".to_string()));
    }

    #[tokio::test]
    async fn test_mark_installed_idempotent() {
        let (store, _) = mem_store();
        store.mark_installed("a").await.unwrap();
        store.mark_installed("b").await.unwrap();
        store.mark_installed("a").await.unwrap();

        assert_eq!(store.list_installed().await, vec!["a", "b"]);
        assert_eq!(store.get_active().await, Some("a".to_string()));
    }

    #[tokio::test]
    async fn test_uninstall_reassigns_active() {
        let (store, _) = mem_store();
        store.mark_installed("a").await.unwrap();
        store.mark_installed("b").await.unwrap();

        store.mark_uninstalled("a").await.unwrap();
        assert_eq!(store.list_installed().await, vec!["b"]);
        assert_eq!(store.get_active().await, Some("b".to_string()));

        store.mark_uninstalled("b").await.unwrap();
        assert!(store.list_installed().await.is_empty());
        assert_eq!(store.get_active().await, None);
    }

    #[tokio::test]
    async fn test_uninstall_non_active_keeps_active() {
        let (store, _) = mem_store();
        store.mark_installed("a").await.unwrap();
        store.mark_installed("b").await.unwrap();

        store.mark_uninstalled("b").await.unwrap();
        assert_eq!(store.get_active().await, Some("a".to_string()));
    }

    #[tokio::test]
    async fn test_set_active_requires_installed() {
        let (store, _) = mem_store();
        store.mark_installed("a").await.unwrap();
        store.mark_installed("b").await.unwrap();

        store.set_active("b").await.unwrap();
        assert_eq!(store.get_active().await, Some("b".to_string()));

        // Unknown id is a no-op
        store.set_active("zzz").await.unwrap();
        assert_eq!(store.get_active().await, Some("b".to_string()));
    }

    #[tokio::test]
    async fn test_stale_active_falls_back_to_first_installed() {
        let (store, storage) = mem_store();
        // Hand-written document with an active id that was never installed
        storage
            .put(
                Path::new("/mem/installed.json"),
                r#"{"installed": ["a", "b"], "active": "gone"}"#,
            )
            .await;
        assert_eq!(store.get_active().await, Some("a".to_string()));
    }

    #[tokio::test]
    async fn test_filesystem_roundtrip() {
        let temp = tempfile::tempdir().unwrap();
        let store = InstallStore::new(temp.path().join("installed.json"));

        store.mark_installed("m-small").await.unwrap();
        let state = store.state().await;
        assert_eq!(state.installed, vec!["m-small"]);
        assert!(state.last_updated.is_some());

        // A second store over the same file sees the same state
        let store2 = InstallStore::new(temp.path().join("installed.json"));
        assert!(store2.is_installed("m-small").await);
    }

    #[tokio::test]
    async fn test_filesystem_storage_remove_tolerates_absence() {
        let temp = tempfile::tempdir().unwrap();
        let storage = FileSystemStorage::new();
        storage
            .remove(&temp.path().join("never-existed.json"))
            .await
            .unwrap();
    }
}
