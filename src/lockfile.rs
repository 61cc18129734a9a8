//! Gemfile.lock resolution
//!
//! The lockfile is already resolved upstream; this module only reads the
//! pinned entries out of it. Ordinary entries are the `    name (version)`
//! lines; git-sourced entries come from the structured `GIT` sections.
//! Everything is computed once in [`Lockfile::parse`].

use crate::error::{StagerError, StagerResult};
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Name of the lockfile inside the application directory
pub const LOCKFILE_NAME: &str = "Gemfile.lock";

/// Package file extension for artifacts
pub const GEM_EXTENSION: &str = "gem";

static DEPENDENCY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s{4}([-\w_.0-9]+)\s*\((.*)\)").expect("dependency pattern is valid")
});

/// A pinned gem: name and exact version
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Dependency {
    pub name: String,
    pub version: String,
}

impl Dependency {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Artifact filename, e.g. `rack-1.2.1.gem`
    pub fn filename(&self) -> String {
        format!("{}-{}.{}", self.name, self.version, GEM_EXTENSION)
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.name, self.version)
    }
}

/// A gem pinned to a git repository and revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VcsDependency {
    pub name: String,
    pub version: String,
    pub uri: String,
    pub revision: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Symbolic ref the Gemfile named, if any
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl VcsDependency {
    pub fn as_dependency(&self) -> Dependency {
        Dependency::new(&self.name, &self.version)
    }
}

/// Parsed lockfile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Lockfile {
    dependencies: Vec<Dependency>,
    vcs: Vec<VcsDependency>,
}

impl Lockfile {
    /// Path of the lockfile for an application
    pub fn path(app_dir: &Path) -> PathBuf {
        app_dir.join(LOCKFILE_NAME)
    }

    /// Read and parse `<app_dir>/Gemfile.lock`
    pub async fn load(app_dir: &Path) -> StagerResult<Self> {
        let path = Self::path(app_dir);
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| StagerError::LockfileRead {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        Self::parse(&text)
    }

    /// Parse lockfile text. Pure: the same text always yields the same result.
    pub fn parse(text: &str) -> StagerResult<Self> {
        let dependencies = text
            .lines()
            .filter_map(|line| DEPENDENCY_LINE.captures(line))
            .map(|caps| Dependency::new(&caps[1], &caps[2]))
            .collect();

        Ok(Self {
            dependencies,
            vcs: parse_git_sections(text)?,
        })
    }

    /// Every pinned entry, in lockfile order
    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    /// Entries sourced from git repositories
    pub fn vcs_dependencies(&self) -> &[VcsDependency] {
        &self.vcs
    }

    /// Entries to install from packaged gems: all entries minus the git ones
    pub fn plain_dependencies(&self) -> Vec<Dependency> {
        let vcs: HashSet<Dependency> = self.vcs.iter().map(VcsDependency::as_dependency).collect();
        self.dependencies
            .iter()
            .filter(|d| !vcs.contains(*d))
            .cloned()
            .collect()
    }

    /// Pinned version of `name`, if the bundle includes it
    pub fn bundles_gem(&self, name: &str) -> Option<&str> {
        self.dependencies
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.version.as_str())
    }
}

/// Fields collected for one `GIT` section
#[derive(Default)]
struct GitSection {
    remote: Option<String>,
    revision: Option<String>,
    branch: Option<String>,
    tag: Option<String>,
    reference: Option<String>,
    specs: Vec<Dependency>,
}

impl GitSection {
    fn finish(self, out: &mut Vec<VcsDependency>) -> StagerResult<()> {
        if self.specs.is_empty() {
            return Ok(());
        }
        let uri = self
            .remote
            .ok_or_else(|| StagerError::LockfileParse("GIT section without remote".to_string()))?;
        let revision = self.revision.ok_or_else(|| {
            StagerError::LockfileParse(format!("GIT section for {} without revision", uri))
        })?;

        for spec in self.specs {
            out.push(VcsDependency {
                name: spec.name,
                version: spec.version,
                uri: uri.clone(),
                revision: revision.clone(),
                branch: self.branch.clone(),
                tag: self.tag.clone(),
                reference: self.reference.clone(),
            });
        }
        Ok(())
    }
}

fn parse_git_sections(text: &str) -> StagerResult<Vec<VcsDependency>> {
    let mut out = Vec::new();
    let mut current: Option<GitSection> = None;

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }

        // Unindented lines start a new section
        if !line.starts_with(' ') {
            if let Some(section) = current.take() {
                section.finish(&mut out)?;
            }
            if line.trim() == "GIT" {
                current = Some(GitSection::default());
            }
            continue;
        }

        let Some(section) = current.as_mut() else {
            continue;
        };

        let indent = line.len() - line.trim_start().len();
        let content = line.trim();
        match indent {
            2 => {
                if let Some((key, value)) = content.split_once(':') {
                    let value = value.trim().to_string();
                    match key {
                        "remote" => section.remote = Some(value),
                        "revision" => section.revision = Some(value),
                        "branch" => section.branch = Some(value),
                        "tag" => section.tag = Some(value),
                        "ref" => section.reference = Some(value),
                        _ => {}
                    }
                }
            }
            4 => {
                if let Some(caps) = DEPENDENCY_LINE.captures(line) {
                    section.specs.push(Dependency::new(&caps[1], &caps[2]));
                }
            }
            // nested requirements of a spec
            _ => {}
        }
    }

    if let Some(section) = current {
        section.finish(&mut out)?;
    }

    Ok(out)
}
