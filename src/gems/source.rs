//! Where a gem artifact comes from

use crate::lockfile::Dependency;
use std::fmt;
use std::path::{Path, PathBuf};

/// Artifact location for one dependency, in priority order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GemSource {
    /// `<app_dir>/vendor/cache/<name>-<version>.gem`, packaged by the app author
    Vendored(PathBuf),
    /// Previously fetched copy in the shared blessed directory
    Blessed(PathBuf),
    /// Not available locally; must be fetched from the registry
    Remote,
}

impl GemSource {
    /// Pick the source for `gem`. A vendored artifact always wins, since the
    /// app author may have packaged a locally modified build.
    pub fn locate(app_dir: &Path, blessed_dir: &Path, gem: &Dependency) -> Self {
        let filename = gem.filename();

        let vendored = app_dir.join("vendor").join("cache").join(&filename);
        if vendored.is_file() {
            return Self::Vendored(vendored);
        }

        let blessed = blessed_dir.join(&filename);
        if blessed.is_file() {
            return Self::Blessed(blessed);
        }

        Self::Remote
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Vendored(p) | Self::Blessed(p) => Some(p),
            Self::Remote => None,
        }
    }
}

impl fmt::Display for GemSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vendored(_) => write!(f, "user"),
            Self::Blessed(_) => write!(f, "blessed"),
            Self::Remote => write!(f, "remote"),
        }
    }
}
