//! Process runner capability
//!
//! Every subprocess the stager starts (build-pack phases, the gem installer,
//! git, chmod/chown/pkill) goes through the [`ProcessRunner`] trait so the
//! privileged behavior can be swapped for a recording fake in tests.

use crate::error::{StagerError, StagerResult};
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

/// Switch to another OS identity before running a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentitySwitch {
    /// Numeric user id to run as
    pub uid: u32,
    /// Named group to switch to as well (via `sg`)
    pub group: Option<String>,
}

/// A command to run, with its working directory and environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub run_as: Option<IdentitySwitch>,
    /// Variables set on top of the (possibly cleared) environment
    pub env: Vec<(String, String)>,
    /// Variables removed from the inherited environment
    pub env_remove: Vec<String>,
    /// Start from an empty environment
    pub clear_env: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Path arguments are passed lossily; staging paths are always UTF-8 in practice
    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn run_as(mut self, identity: IdentitySwitch) -> Self {
        self.run_as = Some(identity);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.env_remove.push(key.into());
        self
    }

    pub fn clear_env(mut self) -> Self {
        self.clear_env = true;
        self
    }

    /// The full argv actually executed, including any identity switch
    pub fn argv(&self) -> Vec<String> {
        let mut inner = Vec::with_capacity(self.args.len() + 1);
        inner.push(self.program.clone());
        inner.extend(self.args.iter().cloned());

        match &self.run_as {
            None => inner,
            Some(IdentitySwitch { uid, group: None }) => {
                let mut argv = vec!["sudo".to_string(), "-u".to_string(), format!("#{}", uid)];
                argv.extend(inner);
                argv
            }
            Some(IdentitySwitch {
                uid,
                group: Some(group),
            }) => {
                let joined = inner
                    .iter()
                    .map(|a| shell_quote(a))
                    .collect::<Vec<_>>()
                    .join(" ");
                vec![
                    "sudo".to_string(),
                    "-u".to_string(),
                    format!("#{}", uid),
                    "sg".to_string(),
                    group.clone(),
                    "-c".to_string(),
                    joined,
                ]
            }
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv().join(" "))
    }
}

/// Exit status and merged stdout+stderr of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was terminated by a signal
    pub code: Option<i32>,
    pub output: String,
}

impl CommandOutput {
    pub fn new(code: i32, output: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            output: output.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs commands to completion
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run the command, blocking the calling flow until it exits.
    ///
    /// A non-zero exit is not an error; only failing to start the process is.
    async fn run(&self, spec: &CommandSpec) -> StagerResult<CommandOutput>;
}

/// Runner backed by real OS processes
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> StagerResult<CommandOutput> {
        let argv = spec.argv();
        debug!("Executing: {:?}", argv);

        let (program, args) = argv
            .split_first()
            .ok_or_else(|| StagerError::Internal("empty command".to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if spec.clear_env {
            cmd.env_clear();
        }
        for key in &spec.env_remove {
            cmd.env_remove(key);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        if let Some(ref dir) = spec.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| StagerError::command_failed(spec.to_string(), e))?;

        let lines = merged_output(&mut child).await?;
        let status = child
            .wait()
            .await
            .map_err(|e| StagerError::command_failed(spec.to_string(), e))?;

        let mut output = lines.join("\n");
        if !output.is_empty() {
            output.push('\n');
        }

        Ok(CommandOutput {
            code: status.code(),
            output,
        })
    }
}

/// Collect stdout and stderr of a child into one stream in arrival order.
async fn merged_output(child: &mut tokio::process::Child) -> StagerResult<Vec<String>> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| StagerError::Internal("stdout not piped".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| StagerError::Internal("stderr not piped".to_string()))?;

    // Untrusted programs print arbitrary bytes, so lines are split raw and
    // decoded lossily; both pipes are drained to EOF.
    let mut stdout_reader = BufReader::new(stdout).split(b'\n');
    let mut stderr_reader = BufReader::new(stderr).split(b'\n');

    let mut all_output = Vec::new();
    let mut stdout_done = false;
    let mut stderr_done = false;

    while !stdout_done || !stderr_done {
        tokio::select! {
            segment = stdout_reader.next_segment(), if !stdout_done => {
                match segment {
                    Ok(Some(bytes)) => all_output.push(decode_line(&bytes)),
                    Ok(None) => stdout_done = true,
                    Err(e) => {
                        debug!("Reading stdout failed: {}", e);
                        stdout_done = true;
                    }
                }
            }
            segment = stderr_reader.next_segment(), if !stderr_done => {
                match segment {
                    Ok(Some(bytes)) => all_output.push(decode_line(&bytes)),
                    Ok(None) => stderr_done = true,
                    Err(e) => {
                        debug!("Reading stderr failed: {}", e);
                        stderr_done = true;
                    }
                }
            }
        }
    }

    Ok(all_output)
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Quote a word for `sh -c`
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%#".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', "'\\''"))
    }
}

/// Look up a group name by gid in `/etc/group` formatted content
pub fn group_name_for_gid(group_file: &str, gid: u32) -> Option<String> {
    group_file.lines().find_map(|line| {
        let mut fields = line.split(':');
        let name = fields.next()?;
        let _password = fields.next()?;
        let id: u32 = fields.next()?.trim().parse().ok()?;
        (id == gid && !name.is_empty()).then(|| name.to_string())
    })
}
