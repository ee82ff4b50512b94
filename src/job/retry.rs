//! Bounded retry combinator
//!
//! Runs an async step up to `max_attempts` times with a fixed delay between
//! attempts. Only transient errors are retried; anything else fails at once.

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use backoff::backoff::Backoff;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Fixed delay, bounded attempt count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.delay())
    }
}

struct BoundedConstant {
    delay: Duration,
    retries_left: u32,
}

impl Backoff for BoundedConstant {
    fn next_backoff(&mut self) -> Option<Duration> {
        if self.retries_left == 0 {
            return None;
        }
        self.retries_left -= 1;
        Some(self.delay)
    }

    fn reset(&mut self) {}
}

/// Run `step` until it succeeds, fails permanently, or the policy runs out.
/// Exhaustion surfaces as [`Error::RetriesExhausted`].
pub async fn retry_bounded<T, F, Fut>(policy: RetryPolicy, operation: &str, mut step: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let backoff = BoundedConstant {
        delay: policy.delay,
        retries_left: policy.max_attempts.saturating_sub(1),
    };
    let mut attempts = 0u32;

    let outcome = backoff::future::retry(backoff, || {
        attempts += 1;
        let attempt = step();
        async move {
            attempt.await.map_err(|err| {
                if err.is_transient() {
                    backoff::Error::transient(err)
                } else {
                    backoff::Error::permanent(err)
                }
            })
        }
    })
    .await;

    match outcome {
        Ok(value) => Ok(value),
        Err(err) if err.is_transient() => {
            debug!(operation, attempts, "Retry budget exhausted: {}", err);
            Err(Error::RetriesExhausted {
                operation: operation.to_string(),
                attempts,
            })
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn busy() -> Error {
        Error::Busy {
            opcode: "mark_needs_rebuild".into(),
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_millis(1));

        let value = retry_bounded(policy, "flaky", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                Err(busy())
            } else {
                Ok(42)
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_exhaustion_is_hard_failure() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1));

        let result: Result<()> = retry_bounded(policy, "always busy", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(busy())
        })
        .await;

        assert!(matches!(
            result,
            Err(Error::RetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(10, Duration::from_millis(1));

        let result: Result<()> = retry_bounded(policy, "broken", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Internal("boom".into()))
        })
        .await;

        assert!(matches!(result, Err(Error::Internal(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
