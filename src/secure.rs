//! Secure executor
//!
//! Runs untrusted commands (build-pack phases, gem installs, gemspec loads)
//! as the restricted staging identity. Each run is bracketed:
//!
//! 1. `chmod -R 0755` and `chown -R` the working directory to the staging identity
//! 2. run the command as that identity
//! 3. kill every process the staging identity still owns
//! 4. `chown -R` the working directory back to the invoking identity
//!
//! Steps 3 and 4 run whether or not the command succeeded. A failure in step 1
//! is fatal, but step 4 is still attempted first. A failure in step 4 is only
//! logged so it never masks the command's own result.

use crate::error::{StagerError, StagerResult};
use crate::process::{CommandOutput, CommandSpec, IdentitySwitch, ProcessRunner};
use rustix::process::{getgid, getuid};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error};

const CHMOD: &str = "/bin/chmod";
const CHOWN: &str = "/bin/chown";
const GROUP_FILE: &str = "/etc/group";

/// Restricted OS identity that untrusted code runs as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingIdentity {
    pub uid: u32,
    pub gid: Option<u32>,
}

impl StagingIdentity {
    /// `uid` or `uid:gid` for chown
    fn owner(&self) -> String {
        match self.gid {
            Some(gid) => format!("{}:{}", self.uid, gid),
            None => self.uid.to_string(),
        }
    }
}

/// The identity the stager itself runs as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvokingIdentity {
    pub uid: u32,
    pub gid: u32,
}

impl InvokingIdentity {
    /// Identity of the current process
    pub fn current() -> Self {
        Self {
            uid: getuid().as_raw(),
            gid: getgid().as_raw(),
        }
    }

    fn owner(&self) -> String {
        format!("{}:{}", self.uid, self.gid)
    }
}

/// Runs commands inside the ownership bracket
#[derive(Clone)]
pub struct SecureExecutor {
    runner: Arc<dyn ProcessRunner>,
    identity: Option<StagingIdentity>,
    invoker: InvokingIdentity,
    group_file: PathBuf,
}

impl SecureExecutor {
    pub fn new(runner: Arc<dyn ProcessRunner>, identity: Option<StagingIdentity>) -> Self {
        Self {
            runner,
            identity,
            invoker: InvokingIdentity::current(),
            group_file: PathBuf::from(GROUP_FILE),
        }
    }

    /// Override the invoking identity (ownership is restored to it)
    pub fn with_invoker(mut self, invoker: InvokingIdentity) -> Self {
        self.invoker = invoker;
        self
    }

    /// Read group names from another file instead of `/etc/group`
    pub fn with_group_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.group_file = path.into();
        self
    }

    pub fn identity(&self) -> Option<StagingIdentity> {
        self.identity
    }

    /// The underlying runner, for commands that need no bracket
    pub fn runner(&self) -> &Arc<dyn ProcessRunner> {
        &self.runner
    }

    /// Run `command` in `working_dir` as the staging identity.
    ///
    /// Returns the exit status and merged output; a non-zero exit is not an
    /// error here, callers decide what it means.
    pub async fn run_secure(
        &self,
        command: CommandSpec,
        working_dir: &Path,
        use_group: bool,
    ) -> StagerResult<CommandOutput> {
        if let Err(e) = self.secure_path(working_dir).await {
            // chown -R may have stopped partway through the tree
            if let Err(restore) = self.unsecure_path(working_dir).await {
                error!("Failed to unsecure dir: {}", restore);
            }
            return Err(e);
        }

        let result = self.run_as_staging(command, working_dir, use_group).await;

        self.kill_strays().await;
        if let Err(e) = self.unsecure_path(working_dir).await {
            error!("Failed to unsecure dir: {}", e);
        }

        result
    }

    /// Run under the staging user and its group; some installers need
    /// group-writable directories
    pub async fn run_secure_group(
        &self,
        command: CommandSpec,
        working_dir: &Path,
    ) -> StagerResult<CommandOutput> {
        self.run_secure(command, working_dir, true).await
    }

    /// Whether the command exited with status zero
    pub async fn run_secure_succeeded(
        &self,
        command: CommandSpec,
        working_dir: &Path,
    ) -> StagerResult<bool> {
        Ok(self.run_secure(command, working_dir, false).await?.success())
    }

    async fn run_as_staging(
        &self,
        command: CommandSpec,
        working_dir: &Path,
        use_group: bool,
    ) -> StagerResult<CommandOutput> {
        let mut command = command.cwd(working_dir);
        if let Some(identity) = self.identity {
            let group = if use_group {
                Some(self.staging_group(identity).await?)
            } else {
                None
            };
            command = command.run_as(IdentitySwitch {
                uid: identity.uid,
                group,
            });
        }
        self.runner.run(&command).await
    }

    /// Hand `path` over to the staging identity
    pub async fn secure_path(&self, path: &Path) -> StagerResult<()> {
        let Some(identity) = self.identity else {
            return Ok(());
        };

        let chmod = CommandSpec::new(CHMOD).args(["-R", "0755"]).path_arg(path);
        let out = self.runner.run(&chmod).await?;
        if !out.success() {
            return Err(StagerError::SecureFile {
                path: path.to_path_buf(),
                reason: format!("Failed chmodding dir: {}", out.output.trim()),
            });
        }

        let chown = CommandSpec::new("sudo")
            .args([CHOWN, "-R", identity.owner().as_str()])
            .path_arg(path);
        let out = self.runner.run(&chown).await?;
        if !out.success() {
            return Err(StagerError::SecureFile {
                path: path.to_path_buf(),
                reason: format!("Failed chowning dir: {}", out.output.trim()),
            });
        }

        Ok(())
    }

    /// Return `path` to the invoking identity
    pub async fn unsecure_path(&self, path: &Path) -> StagerResult<()> {
        if self.identity.is_none() {
            return Ok(());
        }

        let chown = CommandSpec::new("sudo")
            .args([CHOWN, "-R", self.invoker.owner().as_str()])
            .path_arg(path);
        let out = self.runner.run(&chown).await?;
        if !out.success() {
            return Err(StagerError::SecureFile {
                path: path.to_path_buf(),
                reason: format!("Failed chowning dir: {}", out.output.trim()),
            });
        }
        Ok(())
    }

    /// Return ownership of `path` and remove it
    pub async fn secure_delete(&self, path: &Path) {
        if let Err(e) = self.unsecure_path(path).await {
            debug!("Failed reclaiming {}: {}", path.display(), e);
        }
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => debug!("Failed removing {}: {}", path.display(), e),
        }
    }

    /// Kill any process left behind by the staging identity
    async fn kill_strays(&self) {
        let Some(identity) = self.identity else {
            return;
        };

        let pkill = CommandSpec::new("pkill")
            .args(["-9", "-U", identity.uid.to_string().as_str()])
            .run_as(IdentitySwitch {
                uid: identity.uid,
                group: None,
            });
        match self.runner.run(&pkill).await {
            // pkill exits 1 when nothing matched
            Ok(out) => debug!("pkill for uid {} exited with {:?}", identity.uid, out.code),
            Err(e) => debug!("pkill for uid {} failed: {}", identity.uid, e),
        }
    }

    async fn staging_group(&self, identity: StagingIdentity) -> StagerResult<String> {
        let gid = identity.gid.ok_or(StagerError::StagingGroupMissing)?;
        let contents = tokio::fs::read_to_string(&self.group_file)
            .await
            .map_err(|e| StagerError::io(format!("reading {}", self.group_file.display()), e))?;
        crate::process::group_name_for_gid(&contents, gid)
            .ok_or(StagerError::StagingGroupUnknown(gid))
    }
}
