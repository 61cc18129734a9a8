//! Content-addressed directory store

use crate::error::{StagerError, StagerResult};
use crate::fsutil;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

/// Identity of a gem artifact: hex SHA-256 of its contents
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Hash the artifact at `path`
    pub async fn for_artifact(path: &Path) -> StagerResult<Self> {
        let contents = fs::read(path)
            .await
            .map_err(|e| StagerError::io(format!("reading artifact {}", path.display()), e))?;
        Ok(Self::for_bytes(&contents))
    }

    pub fn for_bytes(contents: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(contents)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Installation cache interface consumed by the gem pipeline
#[async_trait]
pub trait InstallationCache: Send + Sync {
    /// Path of the unpacked result for `key`, if one was published
    async fn get(&self, key: &CacheKey) -> Option<PathBuf>;

    /// Publish `unpacked` under `key` and return the entry path.
    ///
    /// The cache takes a copy; `unpacked` may be deleted afterwards.
    async fn put(&self, key: &CacheKey, unpacked: &Path) -> StagerResult<PathBuf>;
}

/// Sidecar metadata written next to each entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntryInfo {
    pub key: CacheKey,
    pub created_at: DateTime<Utc>,
}

/// Installation cache stored as directories under a root
#[derive(Debug, Clone)]
pub struct DirectoryCache {
    root: PathBuf,
}

impl DirectoryCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<k[0..2]>/<k[2..4]>/<key>`
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        let k = key.as_str();
        self.root.join(&k[..2]).join(&k[2..4]).join(k)
    }

    fn info_path(&self, key: &CacheKey) -> PathBuf {
        self.entry_path(key).with_extension("json")
    }

    async fn write_info(&self, key: &CacheKey) {
        let info = CacheEntryInfo {
            key: key.clone(),
            created_at: Utc::now(),
        };
        let written = match serde_json::to_string(&info) {
            Ok(json) => fs::write(self.info_path(key), json).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = written {
            debug!("Failed writing cache metadata for {}: {}", key, e);
        }
    }
}

#[async_trait]
impl InstallationCache for DirectoryCache {
    async fn get(&self, key: &CacheKey) -> Option<PathBuf> {
        let path = self.entry_path(key);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => Some(path),
            _ => None,
        }
    }

    async fn put(&self, key: &CacheKey, unpacked: &Path) -> StagerResult<PathBuf> {
        let dest = self.entry_path(key);
        if let Some(existing) = self.get(key).await {
            return Ok(existing);
        }

        let parent = dest
            .parent()
            .ok_or_else(|| StagerError::Internal(format!("bad cache path {}", dest.display())))?
            .to_path_buf();
        fs::create_dir_all(&parent)
            .await
            .map_err(|e| StagerError::io(format!("creating {}", parent.display()), e))?;

        let staging = parent.join(format!(".{}.tmp-{}", key, Uuid::new_v4()));
        if let Err(e) = fsutil::copy_tree_blocking(unpacked.to_path_buf(), staging.clone()).await {
            let _ = fs::remove_dir_all(&staging).await;
            return Err(e);
        }

        match fs::rename(&staging, &dest).await {
            Ok(()) => {
                debug!("Cached {} at {}", key, dest.display());
                self.write_info(key).await;
                Ok(dest)
            }
            Err(e) => {
                let _ = fs::remove_dir_all(&staging).await;
                // Another job published the same key first
                if self.get(key).await.is_some() {
                    debug!("Cache entry {} already published", key);
                    Ok(dest)
                } else {
                    Err(StagerError::io(format!("publishing cache entry {}", key), e))
                }
            }
        }
    }
}
