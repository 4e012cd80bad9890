//! Exponential backoff for transient stream and storage failures.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::SinkError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    /// Cap on exponential growth.
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// Adds `jitter_fraction / 2 * backoff` on top of each delay.
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_fraction: 0.1,
        }
    }
}

/// Stateless policy: computes the delay before each retry.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay before the `attempt`-th retry (1-based), `None` once exhausted.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.config.max_retries {
            return None;
        }
        let base_ms = self.config.initial_backoff.as_millis() as f64
            * self.config.multiplier.powi((attempt - 1) as i32);
        let capped = base_ms.min(self.config.max_backoff.as_millis() as f64);
        let jitter_ms = capped * self.config.jitter_fraction * 0.5;
        Some(Duration::from_millis((capped + jitter_ms) as u64))
    }

    /// Run `op` until it succeeds, fails permanently, or retries run out.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, SinkError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SinkError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => self.pause(what, &mut attempt, e).await?,
            }
        }
    }

    /// Decide what to do after `err` on a retry loop.
    ///
    /// Transient errors sleep for the next backoff and return `Ok` so the
    /// caller tries again. Permanent errors come straight back. A transient
    /// error with the budget spent comes back wrapped in
    /// [`SinkError::RetriesExhausted`].
    pub async fn pause(
        &self,
        what: &str,
        attempt: &mut u32,
        err: SinkError,
    ) -> Result<(), SinkError> {
        if !err.is_transient() {
            return Err(err);
        }
        *attempt += 1;
        match self.next_delay(*attempt) {
            Some(delay) => {
                warn!(
                    operation = what,
                    attempt = *attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                Ok(())
            }
            None => Err(SinkError::RetriesExhausted {
                attempts: *attempt,
                last: Box::new(err),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            multiplier: 2.0,
            jitter_fraction: 0.0,
        })
    }

    #[test]
    fn delays_grow_and_cap() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: 4,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(300),
            multiplier: 2.0,
            jitter_fraction: 0.0,
        });
        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_delay(3), Some(Duration::from_millis(300)));
        assert_eq!(policy.next_delay(4), Some(Duration::from_millis(300)));
        assert_eq!(policy.next_delay(5), None);
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let calls = AtomicU32::new(0);
        let result = fast(3)
            .run("flaky", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(SinkError::Storage("connection reset".into()))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast(3)
            .run("broken", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SinkError::Query("syntax error".into()))
            })
            .await;
        assert!(matches!(result, Err(SinkError::Query(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_is_fatal() {
        let result: Result<(), _> = fast(2)
            .run("down", || async { Err(SinkError::Stream("timeout".into())) })
            .await;
        match result {
            Err(SinkError::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(last.is_transient());
            }
            other => panic!("unexpected result {other:?}"),
        }
    }
}
