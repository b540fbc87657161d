//! Timeout guard for calls into the socket library.
//!
//! A call that outlives its deadline is dropped (closing anything it had
//! half-opened) and reported as `OperationTimedOut`. Nothing is left pending.

use std::future::Future;
use std::time::Duration;

use wabridge_core::SessionError;

pub async fn guarded<F, T>(operation: &'static str, limit: Duration, fut: F) -> Result<T, SessionError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, fut).await.map_err(|_| {
        tracing::warn!(operation, timeout_ms = limit.as_millis() as u64, "operation timed out");
        SessionError::OperationTimedOut {
            operation,
            after: limit,
        }
    })
}
