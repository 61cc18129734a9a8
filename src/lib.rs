//! Stager - application staging engine
//!
//! Stages an uploaded application into a droplet: runs the buildpack
//! detect/compile/release protocol and installs the app's locked gems,
//! with untrusted code confined to a restricted staging identity.

pub mod buildpack;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod fsutil;
pub mod gems;
pub mod lockfile;
pub mod logging;
pub mod process;
pub mod secure;
pub mod vcs;

#[cfg(test)]
mod testutil;

pub use error::{StagerError, StagerResult};
