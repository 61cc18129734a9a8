//! Deps command - show how an app's lockfile resolves

use crate::cli::args::{DepsArgs, OutputFormat};
use crate::config::Config;
use crate::error::StagerResult;
use crate::lockfile::{Dependency, Lockfile, VcsDependency};
use crate::vcs::vcs_scope;
use console::style;
use serde_json::json;

/// Execute the deps command
pub async fn execute(args: DepsArgs, _config: &Config) -> StagerResult<()> {
    super::require_app_dir(&args.app_dir)?;
    let lockfile = Lockfile::load(&args.app_dir).await?;
    let plain = lockfile.plain_dependencies();
    let vcs = lockfile.vcs_dependencies();

    match args.format {
        OutputFormat::Table => print_table(&plain, vcs),
        OutputFormat::Json => {
            let doc = json!({ "gems": plain, "git": vcs });
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        OutputFormat::Plain => {
            for dep in &plain {
                println!("{}", dep);
            }
            for dep in vcs {
                println!("{} {}", dep.as_dependency(), vcs_scope(&dep.uri, &dep.revision));
            }
        }
    }

    Ok(())
}

fn print_table(plain: &[Dependency], vcs: &[VcsDependency]) {
    if plain.is_empty() && vcs.is_empty() {
        println!("No dependencies locked");
        return;
    }

    println!(
        "{:<30} {:<15} {:<40}",
        style("NAME").bold(),
        style("VERSION").bold(),
        style("SOURCE").bold()
    );
    println!("{}", "-".repeat(85));

    for dep in plain {
        println!("{:<30} {:<15} {:<40}", dep.name, dep.version, "rubygems");
    }
    for dep in vcs {
        println!(
            "{:<30} {:<15} {:<40}",
            dep.name,
            dep.version,
            style(format!("git {}", vcs_scope(&dep.uri, &dep.revision))).cyan()
        );
    }

    println!();
    println!("{} gem(s), {} from git", plain.len() + vcs.len(), vcs.len());
}
