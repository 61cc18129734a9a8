//! Stager - application staging engine
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use stager::cli::{Cli, Commands};
use stager::config::ConfigManager;
use stager::error::StagerResult;
use std::process::ExitCode;
use tracing::debug;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> StagerResult<()> {
    let cli = Cli::parse();

    let config_manager = if let Some(ref path) = cli.config {
        ConfigManager::with_path(path.clone())
    } else {
        ConfigManager::new()
    };

    let mut config = config_manager.load().await?;

    // general.verbose counts as a single -v
    let verbose = cli.verbose.max(u8::from(config.general.verbose));
    // The staging log lives next to the app, so only apps that exist get one
    let log_app_dir = cli.app_dir().filter(|dir| dir.is_dir());
    stager::logging::init(verbose, log_app_dir.map(|d| d.as_path()))?;

    if let Some(uid) = cli.uid {
        debug!("Staging identity from command line: uid {}", uid);
        config.identity.uid = Some(uid);
        config.identity.gid = cli.gid;
    }

    match cli.command {
        Commands::Gems(args) => stager::cli::commands::gems(args, &config).await,
        Commands::Buildpack(args) => stager::cli::commands::buildpack(args, &config).await,
        Commands::Deps(args) => stager::cli::commands::deps(args, &config).await,
        Commands::Config(args) => {
            stager::cli::commands::config(args, &config, &config_manager).await
        }
    }
}
