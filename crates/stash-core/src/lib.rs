//! Stash Core
//!
//! Configuration, error taxonomy, and the storage port shared by the cache
//! engine and the CLI. This crate has minimal dependencies.

pub mod config;
pub mod error;
pub mod ports;

pub use config::{CacheConfig, CompressionType, Mode, RetryPolicy, S3Settings, StorageConfig};
pub use error::{Error, ErrorKind, Result};
pub use ports::ObjectStore;
