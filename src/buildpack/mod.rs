//! Buildpack protocol runner
//!
//! A buildpack is a directory with three executables:
//!
//! | Script | Arguments | Contract |
//! |--------|-----------|----------|
//! | `bin/detect` | `<app_dir>` | exit 0 if the buildpack handles the app |
//! | `bin/compile` | `<app_dir> <cache_dir>` | exit 0 on success |
//! | `bin/release` | `<app_dir>` | print a YAML release descriptor |
//!
//! All three run through the [`SecureExecutor`]. The flow is typed:
//! [`BuildpackRunner::detect`] yields a [`DetectedBuildpack`], whose
//! `compile` yields a [`CompiledBuildpack`] that can be asked for its release
//! info.

pub mod release;

pub use release::ReleaseInfo;

use crate::error::{StagerError, StagerResult};
use crate::process::{CommandOutput, CommandSpec};
use crate::secure::SecureExecutor;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Ruby/Bundler variables scrubbed from every buildpack phase so the
/// stager's own bundle never leaks into the app's build
const SCRUBBED_ENV: &[&str] = &[
    "BUNDLE_GEMFILE",
    "BUNDLE_BIN_PATH",
    "RUBYOPT",
    "GEM_HOME",
    "GEM_PATH",
];

/// Buildpack protocol phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Detect,
    Compile,
    Release,
}

impl Phase {
    pub fn script(&self) -> &'static str {
        match self {
            Self::Detect => "detect",
            Self::Compile => "compile",
            Self::Release => "release",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.script())
    }
}

/// An installed buildpack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buildpack {
    pub name: String,
    pub path: PathBuf,
}

impl Buildpack {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// List installed buildpacks, one per subdirectory, ordered by name
    pub async fn discover(dir: &Path) -> StagerResult<Vec<Self>> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| StagerError::io(format!("listing buildpacks in {}", dir.display()), e))?;

        let mut buildpacks = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StagerError::io(format!("listing buildpacks in {}", dir.display()), e))?
        {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if is_dir {
                let name = entry.file_name().to_string_lossy().into_owned();
                buildpacks.push(Self::new(name, entry.path()));
            }
        }

        if buildpacks.is_empty() {
            return Err(StagerError::NoBuildpacks(dir.to_path_buf()));
        }

        buildpacks.sort_by(|a, b| a.name.cmp(&b.name));
        debug!("Found {} buildpacks in {}", buildpacks.len(), dir.display());
        Ok(buildpacks)
    }

    /// Command line for a phase: `<path>/bin/<phase> <app_dir> [extra]`
    pub fn command(&self, phase: Phase, app_dir: &Path) -> CommandSpec {
        let script = self.path.join("bin").join(phase.script());
        let mut spec = CommandSpec::new(script.to_string_lossy().into_owned()).path_arg(app_dir);
        for key in SCRUBBED_ENV {
            spec = spec.env_remove(*key);
        }
        spec
    }
}

/// Everything a phase needs to run
#[derive(Clone)]
struct PhaseContext {
    executor: SecureExecutor,
    app_dir: PathBuf,
    cache_dir: PathBuf,
}

impl PhaseContext {
    async fn run(&self, buildpack: &Buildpack, phase: Phase) -> StagerResult<CommandOutput> {
        let mut command = buildpack.command(phase, &self.app_dir);
        if phase == Phase::Compile {
            command = command.path_arg(&self.cache_dir);
        }
        self.executor.run_secure(command, &self.app_dir, false).await
    }
}

/// Selects a buildpack for an application
pub struct BuildpackRunner {
    buildpacks: Vec<Buildpack>,
    ctx: PhaseContext,
}

impl BuildpackRunner {
    pub fn new(
        executor: SecureExecutor,
        buildpacks: Vec<Buildpack>,
        app_dir: impl Into<PathBuf>,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            buildpacks,
            ctx: PhaseContext {
                executor,
                app_dir: app_dir.into(),
                cache_dir: cache_dir.into(),
            },
        }
    }

    /// Run `bin/detect` of each buildpack in order; the first to exit 0 wins
    /// and later buildpacks are not probed.
    pub async fn detect(self) -> StagerResult<DetectedBuildpack> {
        for buildpack in self.buildpacks {
            info!("Checking {} ...", buildpack.name);
            let detected = match self.ctx.run(&buildpack, Phase::Detect).await {
                Ok(out) => out.success(),
                // a detect script that cannot be started does not detect
                Err(StagerError::CommandFailed { command, source }) => {
                    debug!("{} failed to start: {}", command, source);
                    false
                }
                Err(e) => return Err(e),
            };
            if detected {
                info!("Detected {}", buildpack.name);
                return Ok(DetectedBuildpack {
                    buildpack,
                    ctx: self.ctx,
                });
            }
            info!("Skipping {}.", buildpack.name);
        }

        Err(StagerError::NoBuildpackDetected)
    }
}

/// A buildpack whose detect phase accepted the app
pub struct DetectedBuildpack {
    buildpack: Buildpack,
    ctx: PhaseContext,
}

impl DetectedBuildpack {
    pub fn buildpack(&self) -> &Buildpack {
        &self.buildpack
    }

    /// Run `bin/compile <app_dir> <cache_dir>`; a non-zero exit is fatal
    pub async fn compile(self) -> StagerResult<CompiledBuildpack> {
        info!("Installing {}.", self.buildpack.name);
        let out = self.ctx.run(&self.buildpack, Phase::Compile).await?;
        info!("{}", out.output);

        if !out.success() {
            return Err(StagerError::BuildpackCompile {
                buildpack: self.buildpack.name,
                output: out.output,
            });
        }

        Ok(CompiledBuildpack {
            buildpack: self.buildpack,
            ctx: self.ctx,
            compile_output: out.output,
            release: OnceCell::new(),
        })
    }
}

/// A buildpack that compiled the app successfully
pub struct CompiledBuildpack {
    buildpack: Buildpack,
    ctx: PhaseContext,
    compile_output: String,
    release: OnceCell<ReleaseInfo>,
}

impl CompiledBuildpack {
    pub fn buildpack(&self) -> &Buildpack {
        &self.buildpack
    }

    pub fn compile_output(&self) -> &str {
        &self.compile_output
    }

    /// Run `bin/release` once and parse its output
    pub async fn release(&self) -> StagerResult<&ReleaseInfo> {
        self.release
            .get_or_try_init(|| async {
                info!("Querying release info from {}", self.buildpack.name);
                let out = self.ctx.run(&self.buildpack, Phase::Release).await?;
                debug!("release info: {}", out.output);
                if !out.success() {
                    return Err(StagerError::ReleaseInfo {
                        buildpack: self.buildpack.name.clone(),
                        reason: format!("release exited with {:?}: {}", out.code, out.output),
                    });
                }
                ReleaseInfo::parse(&self.buildpack.name, &out.output)
            })
            .await
    }
}
