//! Buildpack command - run the buildpack protocol against an app

use crate::buildpack::{Buildpack, BuildpackRunner};
use crate::cli::args::BuildpackArgs;
use crate::config::Config;
use crate::error::StagerResult;
use serde_json::json;

/// Execute the buildpack command; prints the release info as JSON
pub async fn execute(args: BuildpackArgs, config: &Config) -> StagerResult<()> {
    super::require_app_dir(&args.app_dir)?;

    let buildpacks_dir = args
        .buildpacks
        .unwrap_or_else(|| config.paths.buildpacks_dir.clone());
    let cache_dir = args
        .cache_dir
        .unwrap_or_else(|| config.paths.buildpack_cache_dir.clone());

    let buildpacks = Buildpack::discover(&buildpacks_dir).await?;
    let runner = BuildpackRunner::new(
        super::secure_executor(config),
        buildpacks,
        &args.app_dir,
        cache_dir,
    );

    let compiled = runner.detect().await?.compile().await?;
    let release = compiled.release().await?;

    let report = json!({
        "buildpack": compiled.buildpack().name,
        "release": release,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
