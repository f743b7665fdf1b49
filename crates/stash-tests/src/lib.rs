//! Integration test infrastructure for stash.
//!
//! Runs the cache against a real S3 API (MinIO in a testcontainer).
//!
//! # Usage
//!
//! ```ignore
//! use stash_tests::TestContext;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let ctx = TestContext::new().await.unwrap();
//!     // Use ctx.store, ctx.config(..), etc.
//!     ctx.cleanup().await.unwrap();
//! }
//! ```

pub mod containers;
pub mod context;
pub mod helpers;

pub use context::TestContext;
pub use helpers::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,stash_cache=debug,stash_tests=debug")),
        )
        .with_test_writer()
        .try_init();
}
