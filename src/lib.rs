//! llm-manager - Local inference server lifecycle management
//!
//! Installs, tracks, updates and supervises a locally hosted
//! language-model inference server. The CLI layer driving it owns all
//! user-facing output; this crate only reports outcomes and writes the
//! server log.

pub mod catalog;
pub mod config;
pub mod models;
pub mod python;
pub mod repair;
pub mod server;
pub mod state;

pub use catalog::{CATALOG, ModelDefinition, find_model, recommended_model};
pub use config::{ManagerConfig, PythonPackage};
pub use models::{RegistryClient, UpdateCacheEntry, UpdateChecker};
pub use repair::{RepairReport, is_apple_silicon, repair_native_packages};
pub use server::{ServerRecord, ServerSupervisor};
pub use state::{InstallState, InstallStore, StorageBackend};
