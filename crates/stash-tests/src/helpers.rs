//! Bucket lifecycle and workspace helpers.

use stash_cache::S3Store;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

static BUCKET_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Bucket name unique within this test process.
pub fn unique_bucket_name() -> String {
    format!(
        "stash-test-{}-{}",
        std::process::id(),
        BUCKET_COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

pub async fn create_bucket(store: &S3Store) -> anyhow::Result<()> {
    store
        .client()
        .create_bucket()
        .bucket(store.bucket())
        .send()
        .await?;
    Ok(())
}

/// Delete every object in the bucket, then the bucket itself.
pub async fn remove_bucket(store: &S3Store) -> anyhow::Result<()> {
    let client = store.client();
    let listed = client
        .list_objects_v2()
        .bucket(store.bucket())
        .send()
        .await?;
    for object in listed.contents() {
        if let Some(key) = object.key() {
            client
                .delete_object()
                .bucket(store.bucket())
                .key(key)
                .send()
                .await?;
        }
    }
    client.delete_bucket().bucket(store.bucket()).send().await?;
    Ok(())
}

/// Write `contents` to `root/relative`, creating parent directories.
pub fn write_file(root: &Path, relative: &str, contents: &str) -> anyhow::Result<()> {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    Ok(())
}
