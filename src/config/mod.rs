//! Configuration management for stager

pub mod schema;

pub use schema::Config;

use crate::error::{StagerError, StagerResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Environment variable overriding the git client path
pub const GIT_PATH_ENV: &str = "STAGER_GIT_PATH";

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stager")
            .join("config.toml")
    }

    /// Load configuration, falling back to defaults if the file is missing.
    ///
    /// `STAGER_GIT_PATH` overrides `gems.git_path`.
    pub async fn load(&self) -> StagerResult<Config> {
        let mut config = if self.config_path.exists() {
            self.load_from_file(&self.config_path).await?
        } else {
            debug!("Config file not found, using defaults");
            Config::default()
        };

        if let Some(git) = std::env::var_os(GIT_PATH_ENV) {
            debug!("Using git from {}", GIT_PATH_ENV);
            config.gems.git_path = PathBuf::from(git);
        }

        Ok(config)
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> StagerResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| StagerError::io(format!("reading config from {}", path.display()), e))?;

        toml::from_str(&content).map_err(|e| StagerError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
