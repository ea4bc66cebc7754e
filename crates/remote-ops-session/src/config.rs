//! Application configuration file.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use remote_ops_core::ContextConfig;
use remote_ops_ssh::SessionConfig;
use serde::Deserialize;
use thiserror::Error;

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Orchestration limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// One-shot command timeout.
    pub command_timeout_secs: u64,
    /// Planner calls allowed for one goal.
    pub max_planner_rounds: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 60,
            max_planner_rounds: 8,
        }
    }
}

impl OrchestratorConfig {
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Everything the console needs to start.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub session: SessionConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

/// `<local data dir>/remote-ops`, or `./remote-ops` if the platform has none.
#[must_use]
pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("remote-ops")
}

impl AppConfig {
    /// Load a JSON config file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or does not describe a valid
    /// configuration.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
