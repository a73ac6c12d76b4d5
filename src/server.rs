//! Inference server process supervision
//!
//! A single logical server slot: STOPPED -> STARTING -> RUNNING ->
//! STOPPED. An attached server dies with the caller; a detached server
//! outlives it, with a persisted [`ServerRecord`] and the HTTP health
//! probe as the only synchronization between the two processes. The
//! record is a hint, not a guarantee: a stale record for a dead process
//! must never block a future start.

use crate::config::ManagerConfig;
use crate::state::{FileSystemStorage, StorageBackend};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};

/// Persisted record of a running detached server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerRecord {
    pub pid: u32,
    pub model_id: String,
    /// The value passed to the server as its model identifier: a hub
    /// repository id or a local filesystem path
    pub model_path: String,
    pub started_at: DateTime<Utc>,
}

impl ServerRecord {
    pub fn uptime(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.started_at)
    }
}

/// Supervisor for the single local inference server slot
pub struct ServerSupervisor {
    config: ManagerConfig,
    storage: Arc<dyn StorageBackend>,
}

impl ServerSupervisor {
    pub fn new_with_storage(config: ManagerConfig, storage: Arc<dyn StorageBackend>) -> Self {
        Self { config, storage }
    }

    pub fn new(config: ManagerConfig) -> Self {
        Self::new_with_storage(config, Arc::new(FileSystemStorage::new()))
    }

    fn server_args(&self, model_path: &str) -> Vec<String> {
        vec![
            "-m".to_string(),
            self.config.server_module.clone(),
            "--model".to_string(),
            model_path.to_string(),
            "--port".to_string(),
            self.config.server_port.to_string(),
        ]
    }

    /// The persisted server record, if one exists and parses. A corrupt
    /// record reads as absent.
    pub async fn record(&self) -> Option<ServerRecord> {
        let content = self.storage.load(&self.config.server_file()).await.ok()??;
        match serde_json::from_str(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(error = %e, "Corrupt server record, treating as absent");
                None
            }
        }
    }

    /// Probe the local health endpoint. Any failure (connection
    /// refused, timeout, bad status) reads as "not running".
    pub async fn is_running(&self) -> bool {
        let client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(self.config.health_probe_timeout_secs))
            .build()
        {
            Ok(client) => client,
            Err(_) => return false,
        };

        match client.get(self.config.health_url()).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// Launch the server as a child bound to the caller's lifetime.
    /// Output streams are piped so the caller can surface diagnostics.
    /// No record is persisted; the session owns the process.
    pub async fn start_attached(&self, interpreter: &str, model_path: &str) -> Result<Child> {
        let child = Command::new(interpreter)
            .args(self.server_args(model_path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("Failed to spawn inference server")?;

        tracing::info!(
            model = %model_path,
            port = self.config.server_port,
            pid = ?child.id(),
            "Attached inference server spawned"
        );

        Ok(child)
    }

    /// Launch the server as an independent background process that
    /// survives the caller's exit. Both output streams append to the
    /// server log file. Persists a [`ServerRecord`] and returns the pid,
    /// or None if the process could not be spawned.
    pub async fn start_detached(
        &self,
        interpreter: &str,
        model_id: &str,
        model_path: &str,
    ) -> Option<u32> {
        let log_path = self.config.server_log_file();
        if let Some(parent) = log_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!(error = %e, "Failed to create log directory");
                return None;
            }
        }

        let log_file = match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
        {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(error = %e, path = ?log_path, "Failed to open server log file");
                return None;
            }
        };
        let stderr_file = match log_file.try_clone() {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to clone log file for stderr");
                return None;
            }
        };

        let mut command = std::process::Command::new(interpreter);
        command
            .args(self.server_args(model_path))
            .stdin(Stdio::null())
            .stdout(log_file)
            .stderr(stderr_file);

        // A new process group detaches the server from the caller's
        // terminal and signal delivery
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to spawn detached inference server");
                return None;
            }
        };

        let pid = child.id();
        let record = ServerRecord {
            pid,
            model_id: model_id.to_string(),
            model_path: model_path.to_string(),
            started_at: Utc::now(),
        };

        match serde_json::to_string_pretty(&record) {
            Ok(content) => {
                if let Err(e) = self
                    .storage
                    .save(&self.config.server_file(), &content)
                    .await
                {
                    tracing::warn!(error = %e, "Failed to persist server record");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to serialize server record"),
        }

        tracing::info!(
            model = %model_id,
            port = self.config.server_port,
            pid = pid,
            log = ?log_path,
            "Detached inference server spawned"
        );

        Some(pid)
    }

    /// Poll the health endpoint until the server answers or the deadline
    /// passes. Engine warm-up dominates here, so a fixed interval is
    /// enough.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        let interval = Duration::from_secs(self.config.ready_poll_interval_secs);

        loop {
            if self.is_running().await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(timeout = ?timeout, "Server did not become ready in time");
                return false;
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Wait with the configured default deadline
    pub async fn wait_ready_default(&self) -> bool {
        self.wait_ready(Duration::from_secs(self.config.ready_timeout_secs))
            .await
    }

    /// Stop the recorded detached server. Sends SIGTERM to the recorded
    /// pid, tolerating a process that is already gone, then removes the
    /// record unconditionally so a stale record can never wedge the slot.
    pub async fn stop(&self) -> Result<()> {
        if let Some(record) = self.record().await {
            #[cfg(unix)]
            {
                use nix::sys::signal::{Signal, kill};
                use nix::unistd::Pid;

                let pid = Pid::from_raw(record.pid as i32);
                match kill(pid, Signal::SIGTERM) {
                    Ok(()) => {
                        tracing::info!(pid = record.pid, model = %record.model_id, "Server stopped")
                    }
                    Err(e) => {
                        tracing::debug!(pid = record.pid, error = %e, "Server process already gone")
                    }
                }
            }
        }

        self.storage.remove(&self.config.server_file()).await?;
        Ok(())
    }
}
