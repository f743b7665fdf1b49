//! Test context: a MinIO container with a fresh bucket.

use crate::containers::MinioContainer;
use crate::helpers::{create_bucket, remove_bucket, unique_bucket_name};
use stash_cache::S3Store;
use stash_core::{CacheConfig, Mode, RetryPolicy, S3Settings, StorageConfig};
use std::path::Path;
use std::sync::Arc;

/// Running MinIO plus a bucket created for this test.
///
/// Call [`TestContext::cleanup`] to empty and remove the bucket; the
/// container stops when the context is dropped.
pub struct TestContext {
    pub minio: MinioContainer,
    pub settings: S3Settings,
    pub store: Arc<S3Store>,
}

impl TestContext {
    pub async fn new() -> anyhow::Result<Self> {
        crate::init_test_logging();

        let minio = MinioContainer::start().await?;

        let mut settings = S3Settings::new(unique_bucket_name());
        settings.endpoint = Some(minio.endpoint().to_string());
        settings.access_key = Some(minio.access_key().to_string());
        settings.secret_key = Some(minio.secret_key().to_string());
        settings.path_style = true;

        let store = Arc::new(S3Store::connect(&settings).await?);
        create_bucket(&store).await?;

        Ok(Self {
            minio,
            settings,
            store,
        })
    }

    /// Cache configuration pointed at this context's bucket.
    pub fn config(&self, workdir: &Path, branch: &str, mode: Mode, mounts: &[&str]) -> CacheConfig {
        CacheConfig::new("drone-s3-cache", branch, StorageConfig::S3(self.settings.clone()))
            .with_workdir(workdir)
            .with_mounts(mounts.iter().copied())
            .with_mode(Some(mode))
            .with_retry(RetryPolicy {
                max_retries: 2,
                initial_delay_ms: 50,
                max_delay_ms: 200,
            })
    }

    pub async fn cleanup(&self) -> anyhow::Result<()> {
        remove_bucket(&self.store).await
    }
}
