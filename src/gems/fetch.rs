//! Remote gem registry
//!
//! Missing gems are fetched as one batch per staging job. The artifacts of a
//! batch download concurrently; the batch fails as a whole if any artifact
//! cannot be fetched.

use crate::error::{StagerError, StagerResult};
use crate::lockfile::Dependency;
use async_trait::async_trait;
use futures_util::future::join_all;
use std::fs::File;
use std::path::Path;
use std::time::Duration;
use tracing::debug;
use ureq::Agent;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Source of gem artifacts not found locally
#[async_trait]
pub trait RegistryFetcher: Send + Sync {
    /// Download every gem in `gems` into `dest` as `<name>-<version>.gem`
    async fn fetch_all(&self, gems: &[Dependency], dest: &Path) -> StagerResult<()>;
}

/// Registry serving `<base>/<name>-<version>.gem` over HTTP
#[derive(Clone)]
pub struct HttpRegistry {
    base_url: String,
    agent: Agent,
}

impl HttpRegistry {
    pub fn new(base_url: impl Into<String>) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_connect(Some(CONNECT_TIMEOUT))
            .build()
            .into();
        Self {
            base_url: base_url.into(),
            agent,
        }
    }

    pub fn url_for(&self, gem: &Dependency) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), gem.filename())
    }
}

#[async_trait]
impl RegistryFetcher for HttpRegistry {
    async fn fetch_all(&self, gems: &[Dependency], dest: &Path) -> StagerResult<()> {
        let downloads = gems.iter().map(|gem| {
            let url = self.url_for(gem);
            let path = dest.join(gem.filename());
            let agent = self.agent.clone();
            tokio::task::spawn_blocking(move || download(&agent, &url, &path))
        });

        let mut failures = Vec::new();
        for result in join_all(downloads).await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => failures.push(e),
                Err(e) => failures.push(format!("download task failed: {}", e)),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(StagerError::GemFetch(failures.join("; ")))
        }
    }
}

fn download(agent: &Agent, url: &str, path: &Path) -> Result<(), String> {
    debug!("Fetching {}", url);
    let response = agent.get(url).call().map_err(|e| format!("{}: {}", url, e))?;
    let mut reader = response.into_body().into_reader();
    let mut file =
        File::create(path).map_err(|e| format!("creating {}: {}", path.display(), e))?;
    std::io::copy(&mut reader, &mut file).map_err(|e| format!("{}: {}", url, e))?;
    Ok(())
}
