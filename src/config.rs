//! Agent configuration.
//!
//! The configuration collaborator hands the processor a small struct: where
//! the spool lives, where external module executables are discovered, and
//! where their optional configuration files sit. The remaining fields are
//! operational knobs with defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Agent configuration consumed by the request processor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    /// Directory holding per-transaction results of non-blocking requests
    pub spool_dir: PathBuf,
    /// Directory scanned for external module executables
    #[serde(default)]
    pub modules_dir: PathBuf,
    /// Directory holding `<module>.conf` configuration files
    #[serde(default)]
    pub modules_config_dir: PathBuf,
    /// Maximum number of in-flight non-blocking tasks
    #[serde(default = "default_task_capacity")]
    pub task_capacity: usize,
    /// Seconds to wait for in-flight tasks on shutdown
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
    /// Per-stream cap on captured subprocess output, in bytes
    #[serde(default = "default_max_output_size")]
    pub max_output_size: usize,
    /// Wall-clock timeout for actions that do not declare their own
    #[serde(default = "default_action_timeout_secs")]
    pub default_action_timeout_secs: u64,
}

fn default_task_capacity() -> usize {
    100
}

fn default_drain_timeout_secs() -> u64 {
    5
}

fn default_max_output_size() -> usize {
    10 * 1024 * 1024
}

fn default_action_timeout_secs() -> u64 {
    600
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("the spool directory must be provided")]
    EmptySpoolDir,
}

impl AgentConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AgentConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.spool_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptySpoolDir);
        }
        Ok(())
    }

    /// Configuration rooted at a spool directory, defaults elsewhere
    pub fn with_spool_dir<P: Into<PathBuf>>(spool_dir: P) -> Self {
        Self {
            spool_dir: spool_dir.into(),
            modules_dir: PathBuf::new(),
            modules_config_dir: PathBuf::new(),
            task_capacity: default_task_capacity(),
            drain_timeout_secs: default_drain_timeout_secs(),
            max_output_size: default_max_output_size(),
            default_action_timeout_secs: default_action_timeout_secs(),
        }
    }
}
