//! Filesystem-based object store for local development.

use crate::keys::key_to_file_name;
use async_trait::async_trait;
use bytes::Bytes;
use stash_core::{Error, ObjectStore, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use url::form_urlencoded;

/// Temp files start with `~`, which never appears in an encoded key.
const TMP_MARKER: char = '~';

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Stores each object as one file under `root_dir`.
///
/// Keys are percent-encoded into flat file names, so any key maps to exactly
/// one file and nothing escapes the root.
pub struct FilesystemStore {
    root_dir: PathBuf,
}

impl FilesystemStore {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key_to_file_name(key))
    }

    /// Sibling temp file for `key`; written fully, then renamed into place,
    /// so readers never see half an object.
    async fn staging_path(&self, key: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.root_dir)
            .await
            .map_err(|e| self.fs_error(self.root_dir.clone(), e))?;
        Ok(self.root_dir.join(format!(
            "{}{}.{}.{}",
            TMP_MARKER,
            key_to_file_name(key),
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        )))
    }

    async fn commit(&self, tmp_path: PathBuf, key: &str) -> Result<()> {
        let key_path = self.key_path(key);
        if let Err(e) = tokio::fs::rename(&tmp_path, &key_path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(self.fs_error(key_path, e));
        }
        Ok(())
    }

    fn fs_error(&self, path: PathBuf, e: std::io::Error) -> Error {
        // The store is local, but to the orchestrator it is still transport.
        match e.kind() {
            ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock => {
                Error::transient(format!("{}: {}", path.display(), e))
            }
            _ => Error::permanent(format!("{}: {}", path.display(), e)),
        }
    }
}

#[async_trait]
impl ObjectStore for FilesystemStore {
    async fn upload(&self, key: &str, body: Bytes) -> Result<()> {
        let tmp_path = self.staging_path(key).await?;
        if let Err(e) = tokio::fs::write(&tmp_path, &body).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(self.fs_error(tmp_path, e));
        }
        self.commit(tmp_path, key).await
    }

    async fn upload_file(&self, key: &str, source: &Path) -> Result<u64> {
        let tmp_path = self.staging_path(key).await?;
        let size = match tokio::fs::copy(source, &tmp_path).await {
            Ok(size) => size,
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp_path).await;
                return Err(Error::filesystem(source, e));
            }
        };
        self.commit(tmp_path, key).await?;
        Ok(size)
    }

    async fn download(&self, key: &str) -> Result<Bytes> {
        let key_path = self.key_path(key);
        match tokio::fs::read(&key_path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::NotFound(key.to_string())),
            Err(e) => Err(self.fs_error(key_path, e)),
        }
    }

    async fn download_file(&self, key: &str, dest: &Path) -> Result<u64> {
        let key_path = self.key_path(key);
        match tokio::fs::copy(&key_path, dest).await {
            Ok(size) => Ok(size),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                match tokio::fs::try_exists(&key_path).await {
                    Ok(false) => Err(Error::NotFound(key.to_string())),
                    _ => Err(Error::filesystem(dest, e)),
                }
            }
            Err(e) => Err(self.fs_error(key_path, e)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let key_path = self.key_path(key);
        tokio::fs::try_exists(&key_path)
            .await
            .map_err(|e| self.fs_error(key_path, e))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key_path = self.key_path(key);
        match tokio::fs::remove_file(&key_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.fs_error(key_path, e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut read_dir = match tokio::fs::read_dir(&self.root_dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(self.fs_error(self.root_dir.clone(), e)),
        };

        let mut keys = vec![];
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| self.fs_error(self.root_dir.clone(), e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(TMP_MARKER) {
                continue;
            }
            let key: String = form_urlencoded::parse(format!("k={}", name).as_bytes())
                .map(|(_, v)| v.into_owned())
                .next()
                .unwrap_or_default();
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }

        keys.sort();
        Ok(keys)
    }

    fn name(&self) -> &str {
        "filesystem"
    }
}
