//! Timeout utilities.

use std::future::Future;
use std::time::Duration;

use crate::PageWatchError;

/// Run a future with a deadline.
///
/// Whichever settles first wins. On timeout the future is dropped here; callers
/// that need the work to keep running should hand in a detached task handle.
pub async fn with_timeout<T, Fut>(timeout: Duration, future: Fut) -> Result<T, PageWatchError>
where
    Fut: Future<Output = T>,
{
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| PageWatchError::Timeout(timeout))
}
