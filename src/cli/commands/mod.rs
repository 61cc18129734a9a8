//! CLI command implementations

pub mod buildpack;
pub mod config;
pub mod deps;
pub mod gems;

pub use buildpack::execute as buildpack;
pub use config::execute as config;
pub use deps::execute as deps;
pub use gems::execute as gems;

use crate::config::Config;
use crate::error::{StagerError, StagerResult};
use crate::process::SystemRunner;
use crate::secure::SecureExecutor;
use std::path::Path;
use std::sync::Arc;

/// Executor running real processes as the configured staging identity
fn secure_executor(config: &Config) -> SecureExecutor {
    SecureExecutor::new(
        Arc::new(SystemRunner::new()),
        config.identity.staging_identity(),
    )
}

fn require_app_dir(app_dir: &Path) -> StagerResult<()> {
    if app_dir.is_dir() {
        Ok(())
    } else {
        Err(StagerError::PathNotFound(app_dir.to_path_buf()))
    }
}
