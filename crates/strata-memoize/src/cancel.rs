use std::future::Future;

use tokio_util::sync::CancellationToken;

/// Error returned when cooperative work observes a cancelled token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

impl Cancelled {
    /// Returns `Err(Cancelled)` once `token` has been cancelled.
    ///
    /// Long-running collaborator code calls this between units of work.
    pub fn check(token: &CancellationToken) -> Result<(), Cancelled> {
        if token.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Runs `fut` until it completes or `token` is cancelled, whichever comes first.
pub async fn cancellable<T, F>(token: &CancellationToken, fut: F) -> Result<T, Cancelled>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Cancelled),
        value = fut => Ok(value),
    }
}
