//! Retry policy for upstream calls
//!
//! Only transient failures are retried: connection errors, timeouts and the
//! gateway statuses 502/503/504. Anything the provider answered deliberately
//! (4xx, `success: false`) is final on the first attempt.

use super::UpstreamError;
use rail_query::QueryKind;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// How many times a transient upstream failure is retried, and how long to
/// wait in between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Wait before the first retry; the n-th retry waits n times this
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            backoff: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Single attempt
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::ZERO,
        }
    }

    /// Wait before retry number `retry` (starting at 1)
    pub fn delay(&self, retry: u32) -> Duration {
        self.backoff.saturating_mul(retry)
    }

    /// Run `attempt` until it succeeds, fails permanently, or the retries
    /// are used up. The last error is returned.
    pub async fn run<F, Fut, T>(&self, kind: QueryKind, mut attempt: F) -> Result<T, UpstreamError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let mut retries = 0;

        loop {
            let err = match attempt().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_transient() {
                debug!(kind = %kind, error = %err, "Upstream failure is final");
                return Err(err);
            }
            if retries >= self.max_retries {
                warn!(kind = %kind, attempts = retries + 1, error = %err, "Upstream still failing, giving up");
                return Err(err);
            }

            retries += 1;
            let delay = self.delay(retries);
            warn!(
                kind = %kind,
                retry = retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient upstream failure, retrying"
            );
            sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn quick(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff: Duration::from_millis(1),
        }
    }

    /// Runs the policy against a scripted sequence of outcomes and reports
    /// the result plus how many attempts were made
    async fn scripted(
        policy: RetryPolicy,
        outcomes: Vec<Result<&'static str, UpstreamError>>,
    ) -> (Result<&'static str, UpstreamError>, usize) {
        let calls = Cell::new(0usize);
        let result = policy
            .run(QueryKind::Schedule, || {
                let n = calls.get();
                calls.set(n + 1);
                let outcome = outcomes
                    .get(n)
                    .cloned()
                    .unwrap_or_else(|| Err(UpstreamError::other("script exhausted")));
                async move { outcome }
            })
            .await;
        (result, calls.get())
    }

    #[test]
    fn test_default_is_one_retry_after_250ms() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 1);
        assert_eq!(policy.delay(1), Duration::from_millis(250));
        assert_eq!(policy.delay(2), Duration::from_millis(500));
        assert_eq!(RetryPolicy::none().max_retries, 0);
    }

    #[tokio::test]
    async fn test_gateway_status_retried_then_succeeds() {
        let (result, calls) = scripted(
            quick(1),
            vec![Err(UpstreamError::with_status(503, "unavailable")), Ok("schedule")],
        )
        .await;
        assert_eq!(result.unwrap(), "schedule");
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn test_network_failure_gives_up_after_retries() {
        let (result, calls) = scripted(
            quick(1),
            vec![
                Err(UpstreamError::network("connection reset")),
                Err(UpstreamError::network("connection reset")),
                Ok("never reached"),
            ],
        )
        .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn test_client_errors_are_final() {
        for err in [
            UpstreamError::with_status(400, "bad trainNumber"),
            UpstreamError::with_status(429, "quota"),
            UpstreamError::not_found("Flushed PNR"),
            UpstreamError::with_status(500, "boom"),
        ] {
            let (result, calls) = scripted(quick(3), vec![Err(err.clone()), Ok("x")]).await;
            assert_eq!(result.unwrap_err(), err);
            assert_eq!(calls, 1);
        }
    }

    #[tokio::test]
    async fn test_none_makes_one_attempt() {
        let (result, calls) = scripted(
            RetryPolicy::none(),
            vec![Err(UpstreamError::with_status(502, "bad gateway")), Ok("x")],
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
