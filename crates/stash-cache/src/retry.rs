//! Bounded retry for transient transport failures.

use stash_core::{Result, RetryPolicy};
use std::future::Future;
use tracing::warn;

/// Run `op` until it succeeds, fails permanently, or the policy runs out.
///
/// Only errors reporting [`is_transient`](stash_core::Error::is_transient) are
/// retried; everything else is returned on first sight.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay_for(attempt);
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, will retry"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
