//! Error types for stager
//!
//! All modules use `StagerResult<T>` as their return type. Every variant is
//! fatal for the staging job; there is no retry anywhere in the core.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for stager operations
pub type StagerResult<T> = Result<T, StagerError>;

/// All errors that can occur while staging an application
#[derive(Error, Debug)]
pub enum StagerError {
    // Build-pack errors
    #[error("Unable to detect a supported application type")]
    NoBuildpackDetected,

    #[error("Buildpack compilation step failed for {buildpack}:\n{output}")]
    BuildpackCompile { buildpack: String, output: String },

    #[error("Invalid release info from {buildpack}: {reason}")]
    ReleaseInfo { buildpack: String, reason: String },

    #[error("No buildpacks installed in {0}")]
    NoBuildpacks(PathBuf),

    // Privilege bracket errors
    #[error("Failed securing {path}: {reason}")]
    SecureFile { path: PathBuf, reason: String },

    #[error("No group configured for the staging identity")]
    StagingGroupMissing,

    #[error("No group with gid {0} found in /etc/group")]
    StagingGroupUnknown(u32),

    // Gem pipeline errors
    #[error("Failed fetching missing gems from RubyGems: {0}")]
    GemFetch(String),

    #[error("Failed installing {gem}: {reason}")]
    GemInstall { gem: String, reason: String },

    #[error("Failed to read lockfile {path}: {reason}")]
    LockfileRead { path: PathBuf, reason: String },

    #[error("Malformed lockfile: {0}")]
    LockfileParse(String),

    // VCS errors
    #[error("Git clone failed for {uri} at {revision}:\n{output}")]
    GitClone {
        uri: String,
        revision: String,
        output: String,
    },

    #[error("No gemspec named {name} found in checkout of {uri}")]
    GemspecNotFound { name: String, uri: String },

    #[error("Failed loading gemspec {path}: {reason}")]
    GemspecLoad { path: PathBuf, reason: String },

    #[error("Failed building extensions for {gem}:\n{output}")]
    ExtensionBuild { gem: String, output: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StagerError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a gem install error
    pub fn gem_install(gem: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::GemInstall {
            gem: gem.into(),
            reason: reason.into(),
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::NoBuildpackDetected => {
                Some("Check that one of the installed buildpacks supports this application")
            }
            Self::StagingGroupMissing => Some("Set identity.gid in the stager config"),
            Self::GemFetch(_) => Some("Vendor the gems with `bundle package` or retry the staging job"),
            Self::GitClone { .. } => Some("Check the repository URI and pinned revision in Gemfile.lock"),
            _ => None,
        }
    }
}
