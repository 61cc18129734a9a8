//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Stager - stage uploaded applications into droplets
///
/// Runs buildpacks and installs an app's gems under a restricted
/// staging identity.
#[derive(Parser, Debug)]
#[command(name = "stager")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "STAGER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Run untrusted code as this uid (overrides identity.uid)
    #[arg(long, global = true)]
    pub uid: Option<u32>,

    /// Group id of the staging identity (overrides identity.gid)
    #[arg(long, global = true, requires = "uid")]
    pub gid: Option<u32>,
}

impl Cli {
    /// App directory of commands that stage one, for the staging log
    pub fn app_dir(&self) -> Option<&PathBuf> {
        match &self.command {
            Commands::Gems(args) => Some(&args.app_dir),
            Commands::Buildpack(args) => Some(&args.app_dir),
            Commands::Deps(_) | Commands::Config(_) => None,
        }
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install the gems pinned in an app's Gemfile.lock
    Gems(GemsArgs),

    /// Detect, compile and release an app with the installed buildpacks
    Buildpack(BuildpackArgs),

    /// Show the dependencies pinned in an app's Gemfile.lock
    Deps(DepsArgs),

    /// Show configuration
    Config(ConfigArgs),
}

/// Arguments for the gems command
#[derive(Parser, Debug)]
pub struct GemsArgs {
    /// Application directory containing Gemfile.lock
    pub app_dir: PathBuf,

    /// Skip gems pinned to git repositories
    #[arg(long)]
    pub skip_git: bool,
}

/// Arguments for the buildpack command
#[derive(Parser, Debug)]
pub struct BuildpackArgs {
    /// Application directory to stage
    pub app_dir: PathBuf,

    /// Buildpacks directory (defaults to paths.buildpacks_dir)
    #[arg(long)]
    pub buildpacks: Option<PathBuf>,

    /// Cache directory passed to bin/compile (defaults to paths.buildpack_cache_dir)
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,
}

/// Arguments for the deps command
#[derive(Parser, Debug)]
pub struct DepsArgs {
    /// Application directory containing Gemfile.lock
    pub app_dir: PathBuf,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,
}

/// Output format for listings
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}
