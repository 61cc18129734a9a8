//! Native `gem install` of a single artifact
//!
//! The artifact is copied into a private scratch directory, installed there
//! by the staging identity with `gem install --local`, and the unpacked
//! result is published to the installation cache. The scratch directory is
//! removed when the install ends, whatever the outcome.

use crate::cache::{CacheKey, InstallationCache};
use crate::error::{StagerError, StagerResult};
use crate::process::CommandSpec;
use crate::secure::SecureExecutor;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Installs gem artifacts with the platform's gem command
pub struct NativeInstaller<'a> {
    pub ruby_cmd: &'a str,
    pub executor: &'a SecureExecutor,
    pub cache: &'a dyn InstallationCache,
}

impl NativeInstaller<'_> {
    /// Install `artifact` and publish the result under `key`
    pub async fn install(&self, artifact: &Path, key: &CacheKey) -> StagerResult<PathBuf> {
        let scratch = tempfile::Builder::new()
            .prefix("stager-gem-")
            .tempdir()
            .map_err(|e| StagerError::io("creating gem scratch directory", e))?;

        let result = self.install_in(scratch.path(), artifact, key).await;
        self.executor.secure_delete(scratch.path()).await;
        result
    }

    async fn install_in(
        &self,
        scratch: &Path,
        artifact: &Path,
        key: &CacheKey,
    ) -> StagerResult<PathBuf> {
        let filename = artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| StagerError::Internal(format!("bad artifact path {}", artifact.display())))?;

        let staged = stage_artifact(artifact, scratch, &filename).await?;

        let install_dir = scratch.join("gem_install_dir");
        fs::create_dir(&install_dir)
            .await
            .map_err(|e| StagerError::gem_install(&filename, format!("creating install dir: {}", e)))?;

        let command = CommandSpec::new(self.ruby_cmd)
            .args(["-S", "gem", "install"])
            .path_arg(&staged)
            .args([
                "--local",
                "--no-document",
                "-E",
                "-w",
                "-f",
                "--ignore-dependencies",
                "--install-dir",
            ])
            .path_arg(&install_dir);

        debug!(
            "Doing a gem install from {} into {} as user {}",
            staged.display(),
            install_dir.display(),
            self.executor
                .identity()
                .map(|i| i.uid.to_string())
                .unwrap_or_else(|| "stager".to_string())
        );

        let out = self.executor.run_secure(command, scratch, false).await?;
        if !out.success() {
            debug!("Failed executing gem install for {}", filename);
            return Err(StagerError::gem_install(filename, out.output));
        }

        debug!("Installed {}", filename);
        self.cache.put(key, &install_dir).await
    }
}

/// Copy the artifact into the scratch directory, readable by the staging identity
async fn stage_artifact(artifact: &Path, scratch: &Path, filename: &str) -> StagerResult<PathBuf> {
    let staged = scratch.join(filename);
    fs::copy(artifact, &staged).await.map_err(|e| {
        StagerError::gem_install(filename, format!("copying {}: {}", artifact.display(), e))
    })?;
    fs::set_permissions(&staged, std::fs::Permissions::from_mode(0o744))
        .await
        .map_err(|e| StagerError::gem_install(filename, format!("chmodding staged gem: {}", e)))?;
    Ok(staged)
}
