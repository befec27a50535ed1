use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::error::{ClipError, ClipResult};

/// Run `fut` with an upper time bound, giving up early when `cancel` fires.
///
/// The inner future is dropped on timeout or cancellation, which aborts the
/// underlying request.
pub async fn bounded<T, F>(limit: Duration, cancel: &CancellationToken, fut: F) -> ClipResult<T>
where
    F: Future<Output = ClipResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ClipError::Cancelled),
        res = tokio::time::timeout(limit, fut) => match res {
            Ok(inner) => inner,
            Err(_) => Err(ClipError::Timeout(limit)),
        },
    }
}

/// Sleep for `delay` unless cancelled first. Returns `false` when cancelled.
pub async fn pause(delay: Duration, cancel: &CancellationToken) -> bool {
    if delay.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
