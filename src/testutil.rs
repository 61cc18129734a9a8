//! Test helpers: a recording process runner and an offline gem registry

use crate::error::{StagerError, StagerResult};
use crate::gems::RegistryFetcher;
use crate::lockfile::Dependency;
use crate::process::{CommandOutput, CommandSpec, ProcessRunner};
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type Handler = Box<dyn Fn(&CommandSpec) -> CommandOutput + Send + Sync>;

/// Records every command and answers with a scripted handler
pub struct FakeRunner {
    calls: Mutex<Vec<CommandSpec>>,
    handler: Handler,
}

impl FakeRunner {
    /// Every command succeeds with empty output
    pub fn new() -> Arc<Self> {
        Self::with_handler(|_| CommandOutput::new(0, ""))
    }

    /// Answer each command with `handler`, which may also touch the filesystem
    pub fn with_handler<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&CommandSpec) -> CommandOutput + Send + Sync + 'static,
    {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            handler: Box::new(handler),
        })
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// Rendered argv of every call, in order
    pub fn commands(&self) -> Vec<String> {
        self.calls().iter().map(|c| c.to_string()).collect()
    }

    /// Number of calls whose program ends with `name`
    pub fn count(&self, name: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.program.ends_with(name))
            .count()
    }
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    async fn run(&self, spec: &CommandSpec) -> StagerResult<CommandOutput> {
        self.calls.lock().unwrap().push(spec.clone());
        Ok((self.handler)(spec))
    }
}

/// Writes `<name>-<version>.gem` files containing `remote <name>-<version>`
pub struct FakeRegistry {
    /// Number of `fetch_all` calls
    pub batches: AtomicUsize,
    fail: bool,
}

impl FakeRegistry {
    pub fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            batches: AtomicUsize::new(0),
            fail,
        })
    }
}

#[async_trait]
impl RegistryFetcher for FakeRegistry {
    async fn fetch_all(&self, gems: &[Dependency], dest: &Path) -> StagerResult<()> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(StagerError::GemFetch("connection refused".to_string()));
        }
        for gem in gems {
            std::fs::write(dest.join(gem.filename()), format!("remote {}", gem)).unwrap();
        }
        Ok(())
    }
}
