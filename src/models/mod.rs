//! Model download, cache and update-check management
//!
//! Provides functionality for:
//! - Scanning the hub's on-disk cache (local revisions, sizes)
//! - Downloading snapshots and resolving model paths via the hub client
//! - Purging a repository's cached revisions
//! - Time-boxed update checks against the remote registry

pub mod cache;
pub mod download;
pub mod update;

pub use cache::{cache_size, is_cached, local_revision};
pub use download::{clear_cache, download, resolve_path};
pub use update::{HttpRegistryClient, RegistryClient, UpdateCacheEntry, UpdateChecker};
