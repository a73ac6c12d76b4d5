//! Time-boxed update checking against the hub registry
//!
//! Compares the locally cached revision of each installed model against
//! the registry's latest revision, memoizing results in a persisted
//! per-model cache so repeated CLI invocations don't hammer the network.
//! A cached entry is only honored while it is younger than the caller's
//! max age AND its recorded local revision still matches what is on disk;
//! a fresh download therefore forces a re-check even inside the window.

use crate::catalog::{self, ModelDefinition};
use crate::config::ManagerConfig;
use crate::models::cache;
use crate::state::{FileSystemStorage, InstallStore, StorageBackend};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Registry client
// ============================================================================

/// Errors from the remote registry query
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("registry response had no revision hash")]
    MissingRevision,
}

/// Trait for querying the remote registry's latest revision
#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn latest_revision(&self, repository: &str) -> Result<String, RegistryError>;
}

/// Production client hitting `GET {endpoint}/api/models/{repo}`
pub struct HttpRegistryClient {
    endpoint: String,
    timeout: Duration,
}

impl HttpRegistryClient {
    pub fn new(config: &ManagerConfig) -> Self {
        Self {
            endpoint: config.hub_endpoint.clone(),
            timeout: Duration::from_secs(config.registry_timeout_secs),
        }
    }
}

/// The only field we need from the registry's model metadata
#[derive(Deserialize)]
struct ModelInfoResponse {
    sha: Option<String>,
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn latest_revision(&self, repository: &str) -> Result<String, RegistryError> {
        let url = format!("{}/api/models/{}", self.endpoint, repository);
        let client = reqwest::Client::builder().timeout(self.timeout).build()?;

        let response = client.get(&url).send().await?.error_for_status()?;
        let info: ModelInfoResponse = response.json().await?;

        info.sha.ok_or(RegistryError::MissingRevision)
    }
}

// ============================================================================
// Persisted cache
// ============================================================================

/// One recorded update check for a model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateCacheEntry {
    pub model_id: String,
    pub checked_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_revision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_revision: Option<String>,
    pub has_update: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Persisted document: entries keyed by model id
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct UpdateCacheDoc {
    entries: HashMap<String, UpdateCacheEntry>,
}

// ============================================================================
// Checker
// ============================================================================

/// Update checker with a persisted, revision-aware result cache
pub struct UpdateChecker {
    config: ManagerConfig,
    cache_file: PathBuf,
    storage: Arc<dyn StorageBackend>,
    registry: Arc<dyn RegistryClient>,
    /// Serializes read-modify-write of the cache document
    doc_lock: tokio::sync::Mutex<()>,
}

impl UpdateChecker {
    pub fn new_with_parts(
        config: ManagerConfig,
        storage: Arc<dyn StorageBackend>,
        registry: Arc<dyn RegistryClient>,
    ) -> Self {
        Self {
            cache_file: config.update_cache_file(),
            registry,
            storage,
            config,
            doc_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn new(config: ManagerConfig) -> Self {
        let registry = Arc::new(HttpRegistryClient::new(&config));
        Self::new_with_parts(config, Arc::new(FileSystemStorage::new()), registry)
    }

    /// Load the cache document; corrupt or missing means empty.
    async fn load_doc(&self) -> UpdateCacheDoc {
        match self.storage.load(&self.cache_file).await {
            Ok(Some(content)) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Corrupt update cache, starting fresh");
                UpdateCacheDoc::default()
            }),
            _ => UpdateCacheDoc::default(),
        }
    }

    async fn persist(&self, entry: &UpdateCacheEntry) {
        let _guard = self.doc_lock.lock().await;
        let mut doc = self.load_doc().await;
        doc.entries.insert(entry.model_id.clone(), entry.clone());

        let content = match serde_json::to_string_pretty(&doc) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize update cache");
                return;
            }
        };
        if let Err(e) = self.storage.save(&self.cache_file, &content).await {
            tracing::warn!(error = %e, "Failed to persist update cache");
        }
    }

    /// Check one model for an available update.
    ///
    /// Returns None only for ids absent from the catalog. A cache entry
    /// younger than `max_age` whose recorded local revision still matches
    /// the on-disk revision is returned without a network call; anything
    /// else re-queries the registry and overwrites the entry. Failures
    /// degrade to an entry with `has_update = false` and an error
    /// message, and are persisted too so repeated failing calls stay
    /// cheap.
    pub async fn check_one(&self, model_id: &str, max_age: Duration) -> Option<UpdateCacheEntry> {
        let model = catalog::find_model(model_id)?;
        let local = cache::local_revision(&self.config, model.hub_repository);

        if let Some(entry) = self.cached_entry(model_id, max_age, &local).await {
            tracing::debug!(model = %model_id, "Update check cache hit");
            return Some(entry);
        }

        let entry = self.query_registry(model, local).await;
        self.persist(&entry).await;
        Some(entry)
    }

    async fn cached_entry(
        &self,
        model_id: &str,
        max_age: Duration,
        local: &Option<String>,
    ) -> Option<UpdateCacheEntry> {
        if max_age.is_zero() {
            return None;
        }

        let doc = self.load_doc().await;
        let entry = doc.entries.get(model_id)?;

        let age = Utc::now().signed_duration_since(entry.checked_at);
        let max_age = chrono::Duration::from_std(max_age).ok()?;
        if age >= max_age || age < chrono::Duration::zero() {
            return None;
        }
        // A changed local revision (fresh download) invalidates the entry
        // regardless of age
        if &entry.local_revision != local {
            return None;
        }

        Some(entry.clone())
    }

    async fn query_registry(
        &self,
        model: &ModelDefinition,
        local: Option<String>,
    ) -> UpdateCacheEntry {
        let mut entry = UpdateCacheEntry {
            model_id: model.id.to_string(),
            checked_at: Utc::now(),
            local_revision: local.clone(),
            remote_revision: None,
            has_update: false,
            error: None,
        };

        let remote = match self.registry.latest_revision(model.hub_repository).await {
            Ok(remote) => remote,
            Err(e) => {
                tracing::debug!(model = %model.id, error = %e, "Registry query failed");
                entry.error = Some(format!("registry unreachable: {}", e));
                return entry;
            }
        };
        entry.remote_revision = Some(remote.clone());

        let Some(local) = local else {
            entry.error = Some("model not present in local cache".to_string());
            return entry;
        };

        entry.has_update = local != remote;
        entry
    }

    /// Check every installed model, bypassing the cache, concurrently.
    /// Always returns one entry per installed model; failures degrade to
    /// entries carrying an error rather than being dropped.
    pub async fn check_all(&self, store: &InstallStore) -> Vec<UpdateCacheEntry> {
        let installed = store.list_installed().await;

        let checks = installed
            .iter()
            .map(|id| self.check_one(id, Duration::ZERO));
        let results = futures::future::join_all(checks).await;

        installed
            .iter()
            .zip(results)
            .map(|(id, result)| {
                result.unwrap_or_else(|| UpdateCacheEntry {
                    model_id: id.clone(),
                    checked_at: Utc::now(),
                    local_revision: None,
                    remote_revision: None,
                    has_update: false,
                    error: Some("model is not in the catalog".to_string()),
                })
            })
            .collect()
    }
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Mock registry returning a fixed revision (or failing), counting calls
    pub struct MockRegistryClient {
        revision: tokio::sync::RwLock<Option<String>>,
        calls: AtomicU32,
    }

    impl MockRegistryClient {
        pub fn returning(revision: &str) -> Self {
            Self {
                revision: tokio::sync::RwLock::new(Some(revision.to_string())),
                calls: AtomicU32::new(0),
            }
        }

        pub fn failing() -> Self {
            Self {
                revision: tokio::sync::RwLock::new(None),
                calls: AtomicU32::new(0),
            }
        }

        pub async fn set_revision(&self, revision: &str) {
            *self.revision.write().await = Some(revision.to_string());
        }

        pub fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RegistryClient for MockRegistryClient {
        async fn latest_revision(&self, _repository: &str) -> Result<String, RegistryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.revision
                .read()
                .await
                .clone()
                .ok_or(RegistryError::MissingRevision)
        }
    }
}
