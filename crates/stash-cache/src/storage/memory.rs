//! In-memory object store.

use async_trait::async_trait;
use bytes::Bytes;
use stash_core::{Error, ObjectStore, Result};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Object store held entirely in memory. Useful for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<String, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn upload(&self, key: &str, body: Bytes) -> Result<()> {
        self.objects.write().await.insert(key.to_string(), body);
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Bytes> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.read().await.contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .read()
            .await
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_replaces_whole_object() {
        let store = MemoryStore::new();
        store.upload("k", Bytes::from_static(b"first, longer")).await.unwrap();
        store.upload("k", Bytes::from_static(b"second")).await.unwrap();
        assert_eq!(store.download("k").await.unwrap(), Bytes::from_static(b"second"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_missing_key_is_not_found() {
        let store = MemoryStore::new();
        assert!(!store.exists("missing").await.unwrap());
        assert!(store.download("missing").await.unwrap_err().is_not_found());
        store.delete("missing").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_by_prefix() {
        let store = MemoryStore::new();
        for key in ["repo/main/a", "repo/main/b", "repo/dev/a", "other/main/a"] {
            store.upload(key, Bytes::new()).await.unwrap();
        }
        assert_eq!(
            store.list("repo/main/").await.unwrap(),
            vec!["repo/main/a".to_string(), "repo/main/b".to_string()]
        );
        assert_eq!(store.list("").await.unwrap().len(), 4);
    }
}
