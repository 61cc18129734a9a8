//! Configuration schema for stager
//!
//! Configuration is stored at `~/.config/stager/config.toml`

use crate::secure::StagingIdentity;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Restricted identity for untrusted code
    pub identity: IdentityConfig,

    /// Ruby toolchain settings
    pub ruby: RubyConfig,

    /// Shared directories
    pub paths: PathsConfig,

    /// Gem sources
    pub gems: GemsConfig,
}

impl Config {
    /// Directory scoped by library version holding the shared gem state
    pub fn library_cache_dir(&self) -> PathBuf {
        self.paths.cache_base_dir.join(&self.ruby.library_version)
    }

    /// Root of the installation cache
    pub fn gem_cache_dir(&self) -> PathBuf {
        self.library_cache_dir().join("gem_cache")
    }

    /// Directory of blessed gem artifacts
    pub fn blessed_gems_dir(&self) -> PathBuf {
        self.library_cache_dir().join("blessed_gems")
    }
}

/// General application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable verbose logging
    pub verbose: bool,
}

/// Staging identity settings; untrusted code runs as the invoking user when unset
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl IdentityConfig {
    pub fn staging_identity(&self) -> Option<StagingIdentity> {
        self.uid.map(|uid| StagingIdentity { uid, gid: self.gid })
    }
}

/// Ruby toolchain settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RubyConfig {
    /// Library version used to scope install and cache directories
    pub library_version: String,

    /// Ruby interpreter used for gem installs and gemspec handling
    pub ruby_cmd: String,
}

impl Default for RubyConfig {
    fn default() -> Self {
        Self {
            library_version: "1.9.1".to_string(),
            ruby_cmd: "ruby".to_string(),
        }
    }
}

/// Shared directory settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Base of the installation cache and blessed gems
    pub cache_base_dir: PathBuf,

    /// Directory with one subdirectory per installed buildpack
    pub buildpacks_dir: PathBuf,

    /// Scratch cache directory handed to buildpack compile scripts
    pub buildpack_cache_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            cache_base_dir: PathBuf::from("/var/vcap.local/staging/ruby"),
            buildpacks_dir: PathBuf::from("/var/vcap/packages/buildpacks"),
            buildpack_cache_dir: PathBuf::from("/tmp/bundler_cache"),
        }
    }
}

/// Gem source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GemsConfig {
    /// Base URL of the remote gem registry
    pub registry_url: String,

    /// Path of the git client
    pub git_path: PathBuf,
}

impl Default for GemsConfig {
    fn default() -> Self {
        Self {
            registry_url: "http://production.s3.rubygems.org/gems".to_string(),
            git_path: PathBuf::from("/var/vcap/packages/git/bin/git"),
        }
    }
}
