/// Optional capability plumbing shared by the embedder and rerank model.
///
/// A capability that is missing at runtime answers with
/// [`Capability::Unavailable`] instead of an error, so callers branch on a
/// plain value. Transient failures stay errors and get one bounded retry
/// through [`with_retry`].
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Result of asking an optional capability for work.
#[derive(Debug, Clone, PartialEq)]
pub enum Capability<T> {
    Ready(T),
    Unavailable,
}

impl<T> Capability<T> {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Capability::Ready(_))
    }

    /// Convert into an `Option`, dropping the sentinel.
    pub fn ready(self) -> Option<T> {
        match self {
            Capability::Ready(v) => Some(v),
            Capability::Unavailable => None,
        }
    }
}

/// One bounded retry with a fixed backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub backoff: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(backoff: Duration) -> Self {
        Self { backoff }
    }

    /// Policy without a sleep between attempts (tests).
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            backoff: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_millis(100),
        }
    }
}

/// Run `op`, and if it fails run it exactly once more after the backoff.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    match op().await {
        Ok(v) => Ok(v),
        Err(e) => {
            warn!("{what} failed, retrying once in {:?}: {e}", policy.backoff);
            if !policy.backoff.is_zero() {
                tokio::time::sleep(policy.backoff).await;
            }
            op().await
        }
    }
}
