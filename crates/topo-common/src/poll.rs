//! Bounded polling for collaborators that bootstrap asynchronously.
//!
//! A collaborator such as the persistence store may still be loading when
//! the engine starts. `poll_until` asks it repeatedly at a fixed interval
//! and gives up after a fixed number of attempts, so startup is never
//! blocked indefinitely.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Error returned by [`poll_until`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError<E> {
    /// Every attempt answered "not yet".
    #[error("no data after {attempts} attempts")]
    Exhausted { attempts: u32 },

    /// The check itself failed; polling stops immediately.
    #[error("check failed: {0}")]
    Check(E),
}

/// Attempt budget and spacing for [`poll_until`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl PollPolicy {
    pub const fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// Upper bound on the time spent sleeping between attempts.
    pub fn max_wait(&self) -> Duration {
        self.interval * self.attempts.saturating_sub(1)
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(20, Duration::from_millis(100))
    }
}

/// Calls `check` until it yields `Some`, an error, or the budget runs out.
///
/// The check answers `Ok(None)` for "not available yet". An `Err` is not
/// retried: it is returned as [`PollError::Check`].
pub async fn poll_until<T, E, F, Fut>(
    policy: PollPolicy,
    what: &str,
    mut check: F,
) -> Result<T, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        match check().await {
            Ok(Some(value)) => {
                if attempt > 1 {
                    tracing::debug!(what, attempt, "Collaborator became available");
                }
                return Ok(value);
            }
            Ok(None) => {
                tracing::debug!(what, attempt, attempts, "Collaborator not ready, retrying");
                if attempt < attempts {
                    tokio::time::sleep(policy.interval).await;
                }
            }
            Err(e) => return Err(PollError::Check(e)),
        }
    }
    tracing::warn!(what, attempts, "Gave up waiting for collaborator");
    Err(PollError::Exhausted { attempts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_poll_succeeds_after_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let start = tokio::time::Instant::now();

        let value: Result<u32, PollError<()>> =
            poll_until(PollPolicy::default(), "store", move || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Ok(if n >= 3 { Some(n) } else { None }) }
            })
            .await;

        assert_eq!(value, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_exhausts_budget() {
        let policy = PollPolicy::new(5, Duration::from_millis(100));
        let start = tokio::time::Instant::now();

        let value: Result<(), PollError<()>> =
            poll_until(policy, "store", || async { Ok(None) }).await;

        assert_eq!(value, Err(PollError::Exhausted { attempts: 5 }));
        assert_eq!(start.elapsed(), policy.max_wait());
    }

    #[tokio::test]
    async fn test_poll_stops_on_check_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let value: Result<(), PollError<&str>> =
            poll_until(PollPolicy::default(), "store", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err("boom") }
            })
            .await;

        assert_eq!(value, Err(PollError::Check("boom")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
