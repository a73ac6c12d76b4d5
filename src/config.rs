//! Configuration structures and loading logic
//!
//! The manager never reads module-level globals for paths or ports; every
//! component takes a [`ManagerConfig`] so tests can point at temporary
//! directories and unused ports.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A Python package the manager depends on, named both ways: the name
/// pip installs and the module name an `import` uses.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PythonPackage {
    pub pip_name: String,
    pub module: String,
}

impl PythonPackage {
    pub fn new(pip_name: &str, module: &str) -> Self {
        Self {
            pip_name: pip_name.to_string(),
            module: module.to_string(),
        }
    }
}

/// Main manager configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Per-user directory holding every persisted document and the server log
    pub data_dir: PathBuf,
    /// Local port the inference server listens on
    pub server_port: u16,
    /// Module launched as `{python} -m {module} --model .. --port ..`
    pub server_module: String,
    /// Base URL of the model hub registry API
    pub hub_endpoint: String,
    /// Override for the hub cache directory (None = standard resolution)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hub_cache_dir: Option<PathBuf>,
    /// Interpreter names tried in order by the prerequisite probe
    pub interpreter_candidates: Vec<String>,
    /// The inference engine package
    pub engine_package: PythonPackage,
    /// The model hub client package
    pub hub_package: PythonPackage,

    pub update_check_ttl_secs: u64,
    pub import_check_timeout_secs: u64,
    pub resolve_timeout_secs: u64,
    pub registry_timeout_secs: u64,
    pub health_probe_timeout_secs: u64,
    pub ready_poll_interval_secs: u64,
    pub ready_timeout_secs: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            server_port: default_server_port(),
            server_module: default_server_module(),
            hub_endpoint: default_hub_endpoint(),
            hub_cache_dir: None,
            interpreter_candidates: default_interpreter_candidates(),
            engine_package: PythonPackage::new("mlx-lm", "mlx_lm"),
            hub_package: PythonPackage::new("huggingface-hub", "huggingface_hub"),
            update_check_ttl_secs: default_update_check_ttl(),
            import_check_timeout_secs: 30,
            resolve_timeout_secs: 600,
            registry_timeout_secs: 5,
            health_probe_timeout_secs: 2,
            ready_poll_interval_secs: 2,
            ready_timeout_secs: 120,
        }
    }
}

impl ManagerConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content).context("Failed to parse TOML config")?
        } else {
            Self::default()
        };

        // Environment variable overrides
        if let Ok(dir) = std::env::var("LLM_MANAGER_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(port) = std::env::var("LLM_MANAGER_SERVER_PORT") {
            config.server_port = port
                .parse()
                .context("Invalid LLM_MANAGER_SERVER_PORT value")?;
        }
        if let Ok(endpoint) = std::env::var("LLM_MANAGER_HUB_ENDPOINT") {
            config.hub_endpoint = endpoint;
        }

        Ok(config)
    }

    /// Validate configuration and ensure the data directory exists
    /// (created owner-only on unix).
    pub fn validate(&self) -> Result<()> {
        if self.server_port < 1024 {
            anyhow::bail!("Server port must be >= 1024 (got {})", self.server_port);
        }
        if self.interpreter_candidates.is_empty() {
            anyhow::bail!("At least one interpreter candidate is required");
        }

        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Cannot create data directory: {:?}", self.data_dir))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let perms = std::fs::Permissions::from_mode(0o700);
                std::fs::set_permissions(&self.data_dir, perms)
                    .context("Cannot restrict data directory permissions")?;
            }
        }

        Ok(())
    }

    pub fn install_file(&self) -> PathBuf {
        self.data_dir.join("installed.json")
    }

    pub fn server_file(&self) -> PathBuf {
        self.data_dir.join("server.json")
    }

    pub fn update_cache_file(&self) -> PathBuf {
        self.data_dir.join("update-checks.json")
    }

    pub fn server_log_file(&self) -> PathBuf {
        self.data_dir.join("server.log")
    }

    pub fn health_url(&self) -> String {
        format!("http://127.0.0.1:{}/health", self.server_port)
    }
}

// Default functions
fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".llm-manager"))
        .unwrap_or_else(|| PathBuf::from("/tmp/llm-manager"))
}
fn default_server_port() -> u16 {
    8080
}
fn default_server_module() -> String {
    "mlx_lm.server".to_string()
}
fn default_hub_endpoint() -> String {
    "https://huggingface.co".to_string()
}
fn default_interpreter_candidates() -> Vec<String> {
    vec!["python3".to_string(), "python".to_string()]
}
fn default_update_check_ttl() -> u64 {
    6 * 60 * 60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ManagerConfig::default();
        assert_eq!(config.server_port, 8080);
        assert_eq!(config.update_check_ttl_secs, 6 * 60 * 60);
        assert_eq!(config.engine_package.module, "mlx_lm");
        assert_eq!(config.hub_package.pip_name, "huggingface-hub");
    }

    #[test]
    fn test_port_validation() {
        let config = ManagerConfig {
            server_port: 500, // Below 1024
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_interpreter_list_rejected() {
        let config = ManagerConfig {
            interpreter_candidates: vec![],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_creates_data_dir() {
        let temp = tempfile::tempdir().unwrap();
        let config = ManagerConfig {
            data_dir: temp.path().join("data"),
            ..Default::default()
        };
        config.validate().unwrap();
        assert!(config.data_dir.exists());
    }

    #[test]
    fn test_document_paths_live_under_data_dir() {
        let config = ManagerConfig {
            data_dir: PathBuf::from("/x/y"),
            ..Default::default()
        };
        assert_eq!(config.install_file(), PathBuf::from("/x/y/installed.json"));
        assert_eq!(config.server_file(), PathBuf::from("/x/y/server.json"));
        assert_eq!(
            config.update_cache_file(),
            PathBuf::from("/x/y/update-checks.json")
        );
        assert_eq!(config.server_log_file(), PathBuf::from("/x/y/server.log"));
    }

    #[test]
    fn test_health_url_uses_configured_port() {
        let config = ManagerConfig {
            server_port: 9123,
            ..Default::default()
        };
        assert_eq!(config.health_url(), "http://127.0.0.1:9123/health");
    }
}
