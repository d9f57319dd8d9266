//! Persistent blob cache tier storing one file per cache key.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};

use super::resolver::{ResolveOutcome, Resolver, ResolverRole};

/// Cache-role resolver backed by a directory of blob files.
///
/// File names are the SHA-256 of the cache key, so arbitrary key strings
/// never reach the filesystem. Defaults to the cache role; use
/// [`with_role`](DiskResolver::with_role) for chains that treat the disk
/// tier as authoritative.
pub struct DiskResolver {
    name: String,
    dir: PathBuf,
    role: ResolverRole,
}

impl DiskResolver {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
            role: ResolverRole::Cache,
        }
    }

    /// Override the default cache role.
    pub fn with_role(mut self, role: ResolverRole) -> Self {
        self.role = role;
        self
    }

    /// Directory holding the blobs.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn blob_path(&self, cache_key: &str) -> PathBuf {
        let digest = Sha256::digest(cache_key.as_bytes());
        self.dir.join(hex::encode(digest))
    }
}

#[async_trait]
impl<K> Resolver<K, Bytes> for DiskResolver
where
    K: Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn role(&self) -> ResolverRole {
        self.role
    }

    async fn resolve(&self, _key: &K, cache_key: &str) -> ResolveOutcome<Bytes> {
        match tokio::fs::read(self.blob_path(cache_key)).await {
            Ok(data) => ResolveOutcome::hit(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ResolveOutcome::Miss,
            Err(e) => ResolveOutcome::Error(format!("blob read failed: {}", e)),
        }
    }

    async fn cached(&self, _key: &K, cache_key: &str) -> bool {
        tokio::fs::metadata(self.blob_path(cache_key)).await.is_ok()
    }

    async fn save(&self, _key: &K, cache_key: &str, value: &Bytes) {
        let path = self.blob_path(cache_key);
        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            tracing::warn!(resolver = %self.name, error = %e, "failed to create blob dir");
            return;
        }
        if let Err(e) = tokio::fs::write(&path, value).await {
            tracing::warn!(resolver = %self.name, error = %e, path = %path.display(), "blob write failed");
        }
    }

    async fn delete(&self, cache_key: &str) {
        match tokio::fs::remove_file(self.blob_path(cache_key)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(resolver = %self.name, error = %e, "blob delete failed");
            }
        }
    }
}
