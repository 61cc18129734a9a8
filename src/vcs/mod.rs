//! Gems pinned to a git revision
//!
//! Each dependency is cloned into a scratch directory and checked out at its
//! pinned revision. The gemspecs in the checkout are then evaluated once each
//! by the staging identity in a cleared environment and rewritten in static
//! form, so nothing in them runs again when the app boots. The directory of
//! the gemspec whose name matches is copied into the app under
//! `bundler/gems/<scope>`, after its native extensions are built in place.

use crate::config::Config;
use crate::error::{StagerError, StagerResult};
use crate::fsutil;
use crate::lockfile::VcsDependency;
use crate::process::CommandSpec;
use crate::secure::SecureExecutor;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Line printed by the gemspec loader right before its JSON summary
const GEMSPEC_MARKER: &str = "__STAGER_GEMSPEC__";

/// Loads a gemspec with an empty load path, rewrites it statically and
/// prints a summary of it
const LOAD_GEMSPEC_RB: &str = r##"
require 'rubygems'
require 'json'
path = File.expand_path(ARGV[0])
$LOAD_PATH.clear
spec = Dir.chdir(File.dirname(path)) do
  eval(File.read(path), TOPLEVEL_BINDING, path)
end
raise "#{path} did not evaluate to a Gem::Specification" unless spec.is_a?(Gem::Specification)
File.open(path, 'w') { |f| f.write(spec.to_ruby_for_cache) }
puts '__STAGER_GEMSPEC__'
puts JSON.generate(
  'name' => spec.name,
  'version' => spec.version.to_s,
  'extensions' => spec.extensions,
  'require_paths' => spec.require_paths
)
"##;

/// Builds the native extensions of an already unpacked gem in the current
/// directory, reusing the installer without installing anything
const BUILD_EXTENSIONS_RB: &str = r##"
require 'rubygems'
require 'rubygems/installer'
spec = Gem::Specification.load(ARGV[0])
abort "could not load #{ARGV[0]}" unless spec
builder = Class.new(Gem::Installer) do
  def initialize(spec, dir)
    @spec = spec
    @gem_dir = dir
  end

  def spec
    @spec
  end

  def gem_dir
    @gem_dir
  end
end
builder.new(spec, Dir.pwd).build_extensions
"##;

/// Directory name for a checkout inside `bundler/gems`:
/// repository basename without `.git`, a dash, and 12 revision characters
pub fn vcs_scope(uri: &str, revision: &str) -> String {
    let trimmed = uri.trim_end_matches('/');
    let base = trimmed.rsplit(['/', ':']).next().unwrap_or(trimmed);
    let base = base.strip_suffix(".git").unwrap_or(base);
    let short: String = revision.chars().take(12).collect();
    format!("{}-{}", base, short)
}

/// Static summary of an evaluated gemspec
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GemspecInfo {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub require_paths: Vec<String>,
}

impl GemspecInfo {
    /// Extract the summary that follows the marker line in loader output
    pub fn from_loader_output(output: &str) -> Option<Self> {
        let mut lines = output.lines().skip_while(|l| l.trim() != GEMSPEC_MARKER);
        lines.next()?;
        lines.find_map(|l| serde_json::from_str(l.trim()).ok())
    }
}

/// A gemspec located in a checkout
#[derive(Debug, Clone)]
struct LoadedGemspec {
    path: PathBuf,
    info: GemspecInfo,
}

impl LoadedGemspec {
    fn dir(&self) -> &Path {
        self.path.parent().unwrap_or(&self.path)
    }
}

/// Checks out and installs git-sourced gems into one app
pub struct GitGemBuilder {
    git_path: PathBuf,
    ruby_cmd: String,
    executor: SecureExecutor,
    install_dir: PathBuf,
}

impl GitGemBuilder {
    /// `install_dir` is the app's gem installation directory
    pub fn new(config: &Config, executor: SecureExecutor, install_dir: impl Into<PathBuf>) -> Self {
        Self {
            git_path: config.gems.git_path.clone(),
            ruby_cmd: config.ruby.ruby_cmd.clone(),
            executor,
            install_dir: install_dir.into(),
        }
    }

    /// `<install_dir>/bundler/gems`
    pub fn git_gems_dir(&self) -> PathBuf {
        self.install_dir.join("bundler").join("gems")
    }

    /// Where a dependency ends up in the app
    pub fn gem_dir(&self, dep: &VcsDependency) -> PathBuf {
        self.git_gems_dir().join(vcs_scope(&dep.uri, &dep.revision))
    }

    /// Install every git-sourced dependency, in order; the first failure aborts
    pub async fn install_git_gems(&self, deps: &[VcsDependency]) -> StagerResult<()> {
        for dep in deps {
            self.install_git_gem(dep).await?;
        }
        Ok(())
    }

    pub async fn install_git_gem(&self, dep: &VcsDependency) -> StagerResult<PathBuf> {
        let scratch = tempfile::Builder::new()
            .prefix("stager-git-")
            .tempdir()
            .map_err(|e| StagerError::io("creating checkout directory", e))?;

        let result = self.build_in(scratch.path(), dep).await;
        self.executor.secure_delete(scratch.path()).await;
        result
    }

    async fn build_in(&self, scratch: &Path, dep: &VcsDependency) -> StagerResult<PathBuf> {
        info!("Checking out git repo for {} at {}", dep.name, dep.revision);
        let checkout = scratch.join("checkout");
        self.checkout(dep, &checkout).await?;

        let gemspec = self.find_gemspec(&checkout, dep).await?;
        info!("Loaded gemspec: {}-{}", gemspec.info.name, gemspec.info.version);

        if !gemspec.info.extensions.is_empty() {
            info!(
                "Building extensions for {}-{}",
                gemspec.info.name, gemspec.info.version
            );
            self.build_extensions(&gemspec).await?;
        }

        let dest = self.gem_dir(dep);
        info!(
            "Copying git gem {}-{} to app",
            gemspec.info.name, gemspec.info.version
        );
        fsutil::copy_tree_blocking(gemspec.dir().to_path_buf(), dest.clone()).await?;
        Ok(dest)
    }

    fn git(&self) -> CommandSpec {
        CommandSpec::new(self.git_path.to_string_lossy().into_owned())
    }

    async fn checkout(&self, dep: &VcsDependency, checkout: &Path) -> StagerResult<()> {
        let runner = self.executor.runner();
        let clone_failed = |output: String| StagerError::GitClone {
            uri: dep.uri.clone(),
            revision: dep.revision.clone(),
            output,
        };

        // both come from the app's lockfile and must not be read as options
        if dep.revision.is_empty() || dep.revision.starts_with('-') {
            return Err(clone_failed(format!("invalid revision '{}'", dep.revision)));
        }

        let clone = self
            .git()
            .args(["clone", "--quiet", "--no-checkout", "--", dep.uri.as_str()])
            .path_arg(checkout);
        let out = runner.run(&clone).await?;
        if !out.success() {
            return Err(clone_failed(out.output));
        }

        let switch = self
            .git()
            .args(["checkout", "--quiet", dep.revision.as_str()])
            .cwd(checkout);
        let out = runner.run(&switch).await?;
        if !out.success() {
            return Err(clone_failed(out.output));
        }

        if let Ok(out) = runner
            .run(&self.git().args(["rev-parse", "HEAD"]).cwd(checkout))
            .await
        {
            debug!("git revision: {}", out.output.trim());
        }
        if let Ok(out) = runner.run(&self.git().arg("status").cwd(checkout)).await {
            debug!("git status: {}", out.output.trim());
        }
        Ok(())
    }

    /// Evaluate candidate gemspecs until one names `dep`
    async fn find_gemspec(&self, checkout: &Path, dep: &VcsDependency) -> StagerResult<LoadedGemspec> {
        for path in gemspec_candidates(checkout) {
            let info = self.load_gemspec(checkout, &path).await?;
            if info.name == dep.name {
                return Ok(LoadedGemspec { path, info });
            }
            debug!("Skipping gemspec {} for {}", path.display(), info.name);
        }

        Err(StagerError::GemspecNotFound {
            name: dep.name.clone(),
            uri: dep.uri.clone(),
        })
    }

    async fn load_gemspec(&self, checkout: &Path, path: &Path) -> StagerResult<GemspecInfo> {
        // gemspecs shell out to git, so it has to be on the otherwise empty PATH
        let search_path = match self.git_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => {
                format!("{}:/usr/local/bin:/usr/bin:/bin", dir.display())
            }
            _ => "/usr/local/bin:/usr/bin:/bin".to_string(),
        };

        let command = CommandSpec::new(&self.ruby_cmd)
            .args(["-e", LOAD_GEMSPEC_RB])
            .path_arg(path)
            .clear_env()
            .env("PATH", search_path)
            .env("HOME", checkout.to_string_lossy());

        let out = self.executor.run_secure(command, checkout, false).await?;
        if !out.success() {
            return Err(StagerError::GemspecLoad {
                path: path.to_path_buf(),
                reason: out.output,
            });
        }
        GemspecInfo::from_loader_output(&out.output).ok_or_else(|| StagerError::GemspecLoad {
            path: path.to_path_buf(),
            reason: format!("no gemspec summary in output:\n{}", out.output),
        })
    }

    async fn build_extensions(&self, gemspec: &LoadedGemspec) -> StagerResult<()> {
        let command = CommandSpec::new(&self.ruby_cmd)
            .args(["-e", BUILD_EXTENSIONS_RB])
            .path_arg(&gemspec.path);

        let out = self.executor.run_secure(command, gemspec.dir(), false).await?;
        if !out.success() {
            return Err(StagerError::ExtensionBuild {
                gem: format!("{}-{}", gemspec.info.name, gemspec.info.version),
                output: out.output,
            });
        }
        Ok(())
    }
}

/// `*.gemspec` files at the top of the checkout or one directory down, sorted
fn gemspec_candidates(checkout: &Path) -> Vec<PathBuf> {
    WalkDir::new(checkout)
        .min_depth(1)
        .max_depth(2)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "gemspec"))
        .map(|e| e.into_path())
        .collect()
}
