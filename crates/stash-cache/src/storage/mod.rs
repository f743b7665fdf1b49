//! Object store transports.

mod filesystem;
mod memory;
mod s3;

pub use filesystem::FilesystemStore;
pub use memory::MemoryStore;
pub use s3::S3Store;

use stash_core::{ObjectStore, Result, StorageConfig};
use std::sync::Arc;

/// Construct the store described by the storage settings.
pub async fn build_store(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    let store: Arc<dyn ObjectStore> = match config {
        StorageConfig::S3(settings) => Arc::new(S3Store::connect(settings).await?),
        StorageConfig::Filesystem { root } => Arc::new(FilesystemStore::new(root)),
    };
    Ok(store)
}
