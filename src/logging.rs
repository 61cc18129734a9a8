//! Logging setup
//!
//! Human-readable lines go to stderr at the `-v` level. When staging an app,
//! events at info and above are also appended to
//! `<app_dir>/../logs/staging.log` as bare messages.

use crate::error::{StagerError, StagerResult};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Any value forces debug level
pub const DEBUG_ENV: &str = "STAGER_DEBUG";

/// Filter directive for a `-v` count: 0 = warn, 1 = info, 2+ = debug
pub fn filter_directive(verbose: u8, debug: bool) -> &'static str {
    if debug {
        return "stager=debug";
    }
    match verbose {
        0 => "stager=warn",
        1 => "stager=info",
        _ => "stager=debug",
    }
}

/// Filter directive for the staging log
pub fn file_filter_directive(debug: bool) -> &'static str {
    if debug {
        "stager=debug"
    } else {
        "stager=info"
    }
}

/// `<app_dir>/../logs/staging.log`
pub fn staging_log_path(app_dir: &Path) -> PathBuf {
    let base = match app_dir.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => app_dir.join(".."),
    };
    base.join("logs").join("staging.log")
}

/// Install the global subscriber. With `app_dir`, also log to its staging log.
pub fn init(verbose: u8, app_dir: Option<&Path>) -> StagerResult<()> {
    let debug = std::env::var_os(DEBUG_ENV).is_some();
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .with_filter(EnvFilter::new(filter_directive(verbose, debug)));

    let file_layer = match app_dir {
        Some(dir) => {
            let path = staging_log_path(dir);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StagerError::io(format!("creating {}", parent.display()), e))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| StagerError::io(format!("opening {}", path.display()), e))?;
            Some(
                fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_target(false)
                    .with_level(false)
                    .without_time()
                    .with_filter(EnvFilter::new(file_filter_directive(debug))),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| StagerError::Internal(format!("logging already initialized: {}", e)))
}
