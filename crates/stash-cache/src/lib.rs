//! Branch-scoped build cache backed by S3-compatible object storage.

pub mod archiver;
pub mod compression;
pub mod envelope;
pub mod keys;
pub mod orchestrator;
pub mod retry;
pub mod storage;
pub mod types;

pub use orchestrator::CacheOrchestrator;
pub use storage::{FilesystemStore, MemoryStore, S3Store, build_store};
pub use types::{MountOutcome, MountReport, RunReport};
