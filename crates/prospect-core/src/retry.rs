use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::Error;

/// Bounded exponential backoff for transient failures. Errors that are not
/// retryable (malformed input, integrity violations) surface immediately.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: usize,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 100, 5_000)
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_retries: usize, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms),
        }
    }

    pub async fn retry<F, Fut, T>(&self, operation_name: &str, mut f: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, Error>>,
    {
        let mut attempt = 0;
        let mut backoff = self.initial_backoff;

        loop {
            match f().await {
                Ok(result) => {
                    if attempt > 0 {
                        info!(
                            operation = operation_name,
                            attempts = attempt + 1,
                            "Operation succeeded after retries"
                        );
                    }
                    return Ok(result);
                }
                Err(e) if !e.is_retryable() => {
                    warn!(
                        operation = operation_name,
                        error = %e,
                        "Operation failed with non-retryable error"
                    );
                    return Err(e);
                }
                Err(e) => {
                    attempt += 1;
                    if attempt > self.max_retries {
                        warn!(
                            operation = operation_name,
                            attempts = attempt,
                            error = %e,
                            "Operation failed after max retries"
                        );
                        return Err(e);
                    }

                    let jittered = jitter(backoff);
                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        max_retries = self.max_retries,
                        backoff_ms = jittered.as_millis(),
                        error = %e,
                        "Operation failed, retrying"
                    );

                    sleep(jittered).await;

                    backoff = std::cmp::min(backoff * 2, self.max_backoff);
                }
            }
        }
    }
}

/// Up to +/-25% around the nominal delay, so simultaneous retries spread out.
fn jitter(backoff: Duration) -> Duration {
    let millis = backoff.as_millis() as u64;
    if millis == 0 {
        return backoff;
    }
    let spread = millis / 4;
    let low = millis.saturating_sub(spread);
    Duration::from_millis(rand::rng().random_range(low..=millis + spread))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let attempts = AtomicUsize::new(0);
        let policy = RetryPolicy::new(3, 1, 5);

        let result = policy
            .retry("flaky", || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(Error::Database(sqlx::Error::PoolTimedOut))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_retries() {
        let attempts = AtomicUsize::new(0);
        let policy = RetryPolicy::new(2, 1, 5);

        let result: Result<(), Error> = policy
            .retry("always-down", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::Database(sqlx::Error::PoolTimedOut)) }
            })
            .await;

        assert!(result.is_err());
        // Initial attempt plus two retries.
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_surfaces_immediately() {
        let attempts = AtomicUsize::new(0);
        let policy = RetryPolicy::new(5, 1, 5);

        let result: Result<(), Error> = policy
            .retry("integrity", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::DataIntegrity("duplicate row".into())) }
            })
            .await;

        assert!(matches!(result, Err(Error::DataIntegrity(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_jitter_bounds() {
        let nominal = Duration::from_millis(100);
        for _ in 0..50 {
            let j = jitter(nominal);
            assert!(j >= Duration::from_millis(75));
            assert!(j <= Duration::from_millis(125));
        }
    }
}
