//! Gem installation pipeline
//!
//! Turns pinned dependencies into unpacked gems under
//! `<app_dir>/rubygems/ruby/<library_version>/`. Each gem comes from exactly
//! one source, checked in this order:
//!
//! 1. the app's own `vendor/cache`
//! 2. the shared blessed-gems directory
//! 3. the remote registry, fetched in one batch for all remaining gems
//!
//! Local artifacts are looked up in the installation cache by content hash
//! and only installed on a miss. Fetched artifacts are also copied into the
//! blessed directory so later jobs skip the network. Any install failure
//! aborts the whole run.

pub mod fetch;
pub mod install;
pub mod source;

pub use fetch::{HttpRegistry, RegistryFetcher};
pub use source::GemSource;

use crate::cache::{CacheKey, DirectoryCache, InstallationCache};
use crate::config::Config;
use crate::error::{StagerError, StagerResult};
use crate::fsutil;
use crate::lockfile::Dependency;
use crate::secure::SecureExecutor;
use install::NativeInstaller;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

/// Installs gems into one application
pub struct GemInstaller {
    app_dir: PathBuf,
    library_version: String,
    ruby_cmd: String,
    blessed_dir: PathBuf,
    executor: SecureExecutor,
    cache: Arc<dyn InstallationCache>,
    fetcher: Arc<dyn RegistryFetcher>,
}

impl GemInstaller {
    /// Installer using the configured cache directory and registry
    pub fn new(app_dir: impl Into<PathBuf>, config: &Config, executor: SecureExecutor) -> Self {
        Self {
            app_dir: app_dir.into(),
            library_version: config.ruby.library_version.clone(),
            ruby_cmd: config.ruby.ruby_cmd.clone(),
            blessed_dir: config.blessed_gems_dir(),
            executor,
            cache: Arc::new(DirectoryCache::new(config.gem_cache_dir())),
            fetcher: Arc::new(HttpRegistry::new(config.gems.registry_url.clone())),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn InstallationCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn RegistryFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn app_dir(&self) -> &Path {
        &self.app_dir
    }

    pub fn executor(&self) -> &SecureExecutor {
        &self.executor
    }

    /// `<app_dir>/rubygems/ruby/<library_version>`
    pub fn installation_directory(&self) -> PathBuf {
        self.app_dir
            .join("rubygems")
            .join("ruby")
            .join(&self.library_version)
    }

    pub fn blessed_dir(&self) -> &Path {
        &self.blessed_dir
    }

    /// Install every gem in `gems` into the app
    pub async fn install_gems(&self, gems: &[Dependency]) -> StagerResult<()> {
        fs::create_dir_all(&self.blessed_dir).await.map_err(|e| {
            StagerError::io(format!("creating {}", self.blessed_dir.display()), e)
        })?;

        let mut missing = Vec::new();

        for gem in gems {
            let source = GemSource::locate(&self.app_dir, &self.blessed_dir, gem);
            match source.path() {
                Some(artifact) => {
                    let entry = self.installed_entry(artifact, &source.to_string()).await?;
                    self.copy_gem_to_app(&entry, gem).await?;
                }
                None => {
                    info!("Need to fetch {} from RubyGems", gem.filename());
                    missing.push(gem.clone());
                }
            }
        }

        if missing.is_empty() {
            return Ok(());
        }

        let download_dir = tempfile::Builder::new()
            .prefix("stager-fetch-")
            .tempdir()
            .map_err(|e| StagerError::io("creating download directory", e))?;

        info!("Fetching missing gems from RubyGems");
        self.fetcher.fetch_all(&missing, download_dir.path()).await?;

        for gem in &missing {
            let artifact = download_dir.path().join(gem.filename());
            let entry = self.installed_entry(&artifact, "downloaded").await?;
            self.bless(&artifact).await;
            self.copy_gem_to_app(&entry, gem).await?;
        }

        Ok(())
    }

    /// Install a gem file the caller already has in `gem_dir`.
    ///
    /// Goes through the normal pipeline when the gem is already blessed;
    /// otherwise installs the given file and blesses it.
    pub async fn install_local_gem(
        &self,
        gem_dir: &Path,
        gem_filename: &str,
        name: &str,
        version: &str,
    ) -> StagerResult<()> {
        let gem = Dependency::new(name, version);
        if self.blessed_dir.join(gem_filename).is_file() {
            return self.install_gems(&[gem]).await;
        }

        fs::create_dir_all(&self.blessed_dir).await.map_err(|e| {
            StagerError::io(format!("creating {}", self.blessed_dir.display()), e)
        })?;

        let artifact = gem_dir.join(gem_filename);
        let entry = self.installed_entry(&artifact, "local").await?;
        self.bless(&artifact).await;
        self.copy_gem_to_app(&entry, &gem).await
    }

    /// Remove the `cache` directory gem install leaves in the app
    pub async fn remove_gems_cached_in_app(&self) -> StagerResult<()> {
        let cached = self.installation_directory().join("cache");
        match fs::remove_dir_all(&cached).await {
            Ok(()) => {
                debug!("Removed {}", cached.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StagerError::io(format!("removing {}", cached.display()), e)),
        }
    }

    /// Cache entry for `artifact`, installing it on a miss
    async fn installed_entry(&self, artifact: &Path, kind: &str) -> StagerResult<PathBuf> {
        let key = CacheKey::for_artifact(artifact).await?;
        if let Some(entry) = self.cache.get(&key).await {
            debug!("Cache hit for {} gem {}", kind, artifact.display());
            return Ok(entry);
        }

        debug!("Installing {} gem: {}", kind, artifact.display());
        let installer = NativeInstaller {
            ruby_cmd: &self.ruby_cmd,
            executor: &self.executor,
            cache: self.cache.as_ref(),
        };
        installer.install(artifact, &key).await
    }

    async fn copy_gem_to_app(&self, entry: &Path, gem: &Dependency) -> StagerResult<()> {
        info!("Adding {} to app...", gem.filename());
        fsutil::copy_tree_blocking(entry.to_path_buf(), self.installation_directory()).await
    }

    /// Keep a copy of a fetched artifact for later jobs; never fails the install
    async fn bless(&self, artifact: &Path) {
        let Some(filename) = artifact.file_name() else {
            return;
        };
        let dest = self.blessed_dir.join(filename);
        if dest.exists() {
            debug!("{} already blessed", dest.display());
            return;
        }

        let partial = self
            .blessed_dir
            .join(format!(".{}.{}", filename.to_string_lossy(), Uuid::new_v4()));
        let result = async {
            fs::copy(artifact, &partial).await?;
            // hard_link refuses to replace a file another job blessed meanwhile
            fs::hard_link(&partial, &dest).await
        }
        .await;
        let _ = fs::remove_file(&partial).await;

        if let Err(e) = result {
            debug!(
                "Failed adding {} to {}: {}",
                artifact.display(),
                self.blessed_dir.display(),
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{CommandOutput, CommandSpec};
    use crate::testutil::{FakeRegistry, FakeRunner};
    use std::fs as stdfs;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    /// Simulates `gem install`: unpacks into `--install-dir`
    fn gem_install(spec: &CommandSpec) -> CommandOutput {
        if spec.program != "ruby" {
            return CommandOutput::new(0, "");
        }
        let staged = PathBuf::from(&spec.args[3]);
        let pos = spec.args.iter().position(|a| a == "--install-dir").unwrap();
        let install_dir = PathBuf::from(&spec.args[pos + 1]);
        let full_name = staged.file_stem().unwrap().to_string_lossy().into_owned();

        let gem_dir = install_dir.join("gems").join(&full_name);
        stdfs::create_dir_all(gem_dir.join("lib")).unwrap();
        stdfs::write(gem_dir.join("lib/init.rb"), stdfs::read(&staged).unwrap()).unwrap();
        stdfs::create_dir_all(install_dir.join("cache")).unwrap();
        stdfs::copy(&staged, install_dir.join("cache").join(staged.file_name().unwrap())).unwrap();
        CommandOutput::new(0, format!("Successfully installed {}", full_name))
    }

    struct Fixture {
        _root: TempDir,
        app: PathBuf,
        config: Config,
    }

    fn fixture() -> Fixture {
        let root = TempDir::new().unwrap();
        let app = root.path().join("app");
        stdfs::create_dir_all(&app).unwrap();
        let mut config = Config::default();
        config.paths.cache_base_dir = root.path().join("staging");
        Fixture {
            app,
            config,
            _root: root,
        }
    }

    fn installer(
        fx: &Fixture,
        app: &Path,
        runner: Arc<FakeRunner>,
        registry: Arc<FakeRegistry>,
    ) -> GemInstaller {
        GemInstaller::new(app, &fx.config, SecureExecutor::new(runner, None)).with_fetcher(registry)
    }

    fn rack() -> Vec<Dependency> {
        vec![Dependency::new("rack", "1.2.1")]
    }

    #[tokio::test]
    async fn fetches_installs_and_blesses_missing_gems() {
        let fx = fixture();
        let runner = FakeRunner::with_handler(gem_install);
        let registry = FakeRegistry::new(false);
        let gems = installer(&fx, &fx.app, runner.clone(), registry.clone());

        gems.install_gems(&rack()).await.unwrap();

        assert_eq!(registry.batches.load(Ordering::SeqCst), 1);
        assert_eq!(runner.count("ruby"), 1);
        assert!(fx.config.blessed_gems_dir().join("rack-1.2.1.gem").is_file());
        let installed = fx
            .app
            .join("rubygems/ruby/1.9.1/gems/rack-1.2.1/lib/init.rb");
        assert_eq!(stdfs::read_to_string(installed).unwrap(), "remote rack-1.2.1");
    }

    #[tokio::test]
    async fn missing_gems_are_fetched_in_one_batch() {
        let fx = fixture();
        let registry = FakeRegistry::new(false);
        let gems = installer(&fx, &fx.app, FakeRunner::with_handler(gem_install), registry.clone());

        gems.install_gems(&[
            Dependency::new("rack", "1.2.1"),
            Dependency::new("tilt", "1.1"),
            Dependency::new("sinatra", "1.0"),
        ])
        .await
        .unwrap();

        assert_eq!(registry.batches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn vendored_gem_wins_without_network() {
        let fx = fixture();
        stdfs::create_dir_all(fx.app.join("vendor/cache")).unwrap();
        stdfs::write(fx.app.join("vendor/cache/rack-1.2.1.gem"), "patched rack").unwrap();
        let blessed = fx.config.blessed_gems_dir();
        stdfs::create_dir_all(&blessed).unwrap();
        stdfs::write(blessed.join("rack-1.2.1.gem"), "blessed rack").unwrap();

        let registry = FakeRegistry::new(false);
        let gems = installer(&fx, &fx.app, FakeRunner::with_handler(gem_install), registry.clone());
        gems.install_gems(&rack()).await.unwrap();

        assert_eq!(registry.batches.load(Ordering::SeqCst), 0);
        let installed = fx
            .app
            .join("rubygems/ruby/1.9.1/gems/rack-1.2.1/lib/init.rb");
        assert_eq!(stdfs::read_to_string(installed).unwrap(), "patched rack");
    }

    #[tokio::test]
    async fn identical_artifacts_install_once() {
        let fx = fixture();
        let blessed = fx.config.blessed_gems_dir();
        stdfs::create_dir_all(&blessed).unwrap();
        stdfs::write(blessed.join("rack-1.2.1.gem"), "blessed rack").unwrap();

        let runner = FakeRunner::with_handler(gem_install);
        let other_app = fx.app.parent().unwrap().join("other");
        stdfs::create_dir_all(&other_app).unwrap();

        installer(&fx, &fx.app, runner.clone(), FakeRegistry::new(false))
            .install_gems(&rack())
            .await
            .unwrap();
        installer(&fx, &other_app, runner.clone(), FakeRegistry::new(false))
            .install_gems(&rack())
            .await
            .unwrap();

        assert_eq!(runner.count("ruby"), 1);
        assert!(other_app
            .join("rubygems/ruby/1.9.1/gems/rack-1.2.1/lib/init.rb")
            .is_file());
    }

    #[tokio::test]
    async fn reinstalling_is_idempotent() {
        let fx = fixture();
        let runner = FakeRunner::with_handler(gem_install);
        let registry = FakeRegistry::new(false);
        let gems = installer(&fx, &fx.app, runner.clone(), registry.clone());

        gems.install_gems(&rack()).await.unwrap();
        let before = tree(&gems.installation_directory());
        gems.install_gems(&rack()).await.unwrap();
        let after = tree(&gems.installation_directory());

        assert_eq!(before, after);
        // second run is served by the blessed copy and the cache
        assert_eq!(registry.batches.load(Ordering::SeqCst), 1);
        assert_eq!(runner.count("ruby"), 1);
    }

    #[tokio::test]
    async fn install_failure_aborts_the_run() {
        let fx = fixture();
        let runner = FakeRunner::with_handler(|spec| {
            if spec.program == "ruby" {
                CommandOutput::new(1, "ERROR: Failed to build gem native extension.")
            } else {
                CommandOutput::new(0, "")
            }
        });
        let gems = installer(&fx, &fx.app, runner, FakeRegistry::new(false));

        let err = gems
            .install_gems(&[Dependency::new("json", "1.4.6"), Dependency::new("rack", "1.2.1")])
            .await
            .unwrap_err();
        match err {
            StagerError::GemInstall { gem, reason } => {
                assert_eq!(gem, "json-1.4.6.gem");
                assert!(reason.contains("native extension"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!gems.installation_directory().join("gems/rack-1.2.1").exists());
    }

    #[tokio::test]
    async fn fetch_failure_is_fatal() {
        let fx = fixture();
        let runner = FakeRunner::with_handler(gem_install);
        let gems = installer(&fx, &fx.app, runner.clone(), FakeRegistry::new(true));

        let err = gems.install_gems(&rack()).await.unwrap_err();
        assert!(matches!(err, StagerError::GemFetch(_)));
        assert_eq!(runner.count("ruby"), 0);
    }

    #[tokio::test]
    async fn existing_blessed_copy_is_not_replaced() {
        let fx = fixture();
        let gems = installer(&fx, &fx.app, FakeRunner::with_handler(gem_install), FakeRegistry::new(false));
        stdfs::create_dir_all(gems.blessed_dir()).unwrap();
        let downloaded = fx.app.join("rack-1.2.1.gem");
        stdfs::write(&downloaded, "new bytes").unwrap();
        stdfs::write(gems.blessed_dir().join("rack-1.2.1.gem"), "old bytes").unwrap();

        gems.bless(&downloaded).await;

        let kept = stdfs::read_to_string(gems.blessed_dir().join("rack-1.2.1.gem")).unwrap();
        assert_eq!(kept, "old bytes");
        let stray: Vec<_> = stdfs::read_dir(gems.blessed_dir())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        assert!(stray.is_empty());
    }

    #[tokio::test]
    async fn removes_gem_cache_from_app() {
        let fx = fixture();
        let gems = installer(&fx, &fx.app, FakeRunner::with_handler(gem_install), FakeRegistry::new(false));
        gems.install_gems(&rack()).await.unwrap();
        assert!(gems.installation_directory().join("cache").exists());

        gems.remove_gems_cached_in_app().await.unwrap();
        assert!(!gems.installation_directory().join("cache").exists());
        // nothing left to remove is fine
        gems.remove_gems_cached_in_app().await.unwrap();
    }

    #[tokio::test]
    async fn local_gem_is_installed_and_blessed() {
        let fx = fixture();
        let local = fx.app.parent().unwrap().join("local");
        stdfs::create_dir_all(&local).unwrap();
        stdfs::write(local.join("bundler-1.0.10.gem"), "bundler").unwrap();

        let registry = FakeRegistry::new(false);
        let gems = installer(&fx, &fx.app, FakeRunner::with_handler(gem_install), registry.clone());
        gems.install_local_gem(&local, "bundler-1.0.10.gem", "bundler", "1.0.10")
            .await
            .unwrap();

        assert!(gems.blessed_dir().join("bundler-1.0.10.gem").is_file());
        assert!(gems
            .installation_directory()
            .join("gems/bundler-1.0.10/lib/init.rb")
            .is_file());
        assert_eq!(registry.batches.load(Ordering::SeqCst), 0);
    }

    fn tree(root: &Path) -> Vec<(PathBuf, Vec<u8>)> {
        walkdir::WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(|e| (e.path().to_path_buf(), stdfs::read(e.path()).unwrap()))
            .collect()
    }
}
