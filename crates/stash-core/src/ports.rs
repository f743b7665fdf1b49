//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the cache core and external adapters.

use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;

/// Bucket-scoped object storage used to persist cache entries.
///
/// Implementations must report a missing object as [`crate::Error::NotFound`]
/// so restores can fall back to the default branch, and keep every other
/// failure in [`crate::Error::Transport`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` under `key`, replacing any existing object.
    async fn upload(&self, key: &str, body: Bytes) -> Result<()>;

    /// Fetch the object stored under `key`.
    async fn download(&self, key: &str) -> Result<Bytes>;

    /// Store the contents of the file at `source` under `key` and return
    /// its size.
    ///
    /// The default reads the file into memory; backends that can stream
    /// from disk override it.
    async fn upload_file(&self, key: &str, source: &Path) -> Result<u64> {
        let body = tokio::fs::read(source)
            .await
            .map_err(|e| Error::filesystem(source, e))?;
        let size = body.len() as u64;
        self.upload(key, Bytes::from(body)).await?;
        Ok(size)
    }

    /// Write the object stored under `key` to `dest`, replacing the file,
    /// and return its size.
    async fn download_file(&self, key: &str, dest: &Path) -> Result<u64> {
        let body = self.download(key).await?;
        tokio::fs::write(dest, &body)
            .await
            .map_err(|e| Error::filesystem(dest, e))?;
        Ok(body.len() as u64)
    }

    /// Check if an object exists.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Remove an object. Missing objects are not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// List keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Short backend name for logs.
    fn name(&self) -> &str;
}
