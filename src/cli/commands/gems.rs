//! Gems command - install an app's locked gems

use crate::cli::args::GemsArgs;
use crate::config::Config;
use crate::error::StagerResult;
use crate::gems::GemInstaller;
use crate::lockfile::Lockfile;
use crate::vcs::GitGemBuilder;
use console::style;
use tracing::info;

/// Execute the gems command
pub async fn execute(args: GemsArgs, config: &Config) -> StagerResult<()> {
    super::require_app_dir(&args.app_dir)?;
    let lockfile = Lockfile::load(&args.app_dir).await?;
    let installer = GemInstaller::new(&args.app_dir, config, super::secure_executor(config));

    let (plain, git) = install_locked(&installer, config, &lockfile, args.skip_git).await?;

    println!(
        "{} Installed {} gem(s) and {} git gem(s) into {}",
        style("✓").green(),
        plain,
        git,
        installer.installation_directory().display()
    );
    Ok(())
}

/// Install registry gems, then git gems, then drop the `.gem` files left in
/// the app. Returns how many of each were installed.
async fn install_locked(
    installer: &GemInstaller,
    config: &Config,
    lockfile: &Lockfile,
    skip_git: bool,
) -> StagerResult<(usize, usize)> {
    let plain = lockfile.plain_dependencies();
    info!("Installing {} gem(s)", plain.len());
    installer.install_gems(&plain).await?;

    let vcs = lockfile.vcs_dependencies();
    let mut git_installed = 0;
    if skip_git {
        if !vcs.is_empty() {
            info!("Skipping {} git gem(s)", vcs.len());
        }
    } else if !vcs.is_empty() {
        GitGemBuilder::new(
            config,
            installer.executor().clone(),
            installer.installation_directory(),
        )
        .install_git_gems(vcs)
        .await?;
        git_installed = vcs.len();
    }

    installer.remove_gems_cached_in_app().await?;
    Ok((plain.len(), git_installed))
}
