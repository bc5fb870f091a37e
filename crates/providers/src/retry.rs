//! Retry coordinator: bounded exponential backoff around a transport call.

use std::future::Future;

use kiln_core::{CancellationToken, EngineError, Result, RetryPolicy};
use tracing::warn;

/// Runs an operation under a `RetryPolicy`.
///
/// `Cancelled` and `PreconditionFailed` propagate immediately. Any other
/// failure is retried after `base_delay * factor^attempt` while attempts
/// remain; once they run out the last failure is returned.
pub struct RetryCoordinator<'a> {
    policy: &'a RetryPolicy,
    cancel: &'a CancellationToken,
}

impl<'a> RetryCoordinator<'a> {
    pub fn new(policy: &'a RetryPolicy, cancel: &'a CancellationToken) -> Self {
        Self { policy, cancel }
    }

    /// Call `operation(attempt)` for `attempt` in `0..=max_retries` until it
    /// succeeds.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let error = match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !error.is_retryable() || attempt + 1 >= max_attempts {
                return Err(error);
            }

            let delay = self.policy.delay_for(attempt);
            warn!(
                attempt = attempt + 1,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Backend call failed, retrying"
            );

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(EngineError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }

            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_retries,
            Duration::from_millis(100),
            2.0,
            Duration::from_secs(5),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_until_success() {
        let calls = AtomicU32::new(0);
        let policy = policy(5);
        let cancel = CancellationToken::new();

        let result = RetryCoordinator::new(&policy, &cancel)
            .run(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(EngineError::Network("refused".into()))
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_attempts_surface_last_error() {
        let calls = AtomicU32::new(0);
        let policy = policy(2);
        let cancel = CancellationToken::new();

        let result: Result<()> = RetryCoordinator::new(&policy, &cancel)
            .run(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 2 {
                        Err(EngineError::Http {
                            status: 503,
                            body: "last".into(),
                        })
                    } else {
                        Err(EngineError::Timeout { timeout_ms: 5000 })
                    }
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            result.unwrap_err(),
            EngineError::Http {
                status: 503,
                body: "last".into()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn delays_follow_geometric_backoff() {
        let started = Instant::now();
        let stamps = Mutex::new(Vec::new());
        let policy = policy(3);
        let cancel = CancellationToken::new();

        let _: Result<()> = RetryCoordinator::new(&policy, &cancel)
            .run(|_| {
                stamps.lock().unwrap().push(started.elapsed());
                async { Err(EngineError::Network("down".into())) }
            })
            .await;

        let stamps = stamps.into_inner().unwrap();
        let gaps: Vec<u128> = stamps.windows(2).map(|w| (w[1] - w[0]).as_millis()).collect();
        assert_eq!(gaps, vec![100, 200, 400]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_is_never_retried() {
        let calls = AtomicU32::new(0);
        let policy = policy(4);
        let cancel = CancellationToken::new();

        let result: Result<()> = RetryCoordinator::new(&policy, &cancel)
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(EngineError::Cancelled) }
            })
            .await;

        assert_eq!(result.unwrap_err(), EngineError::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn precondition_failure_is_never_retried() {
        let calls = AtomicU32::new(0);
        let policy = policy(4);
        let cancel = CancellationToken::new();

        let result: Result<()> = RetryCoordinator::new(&policy, &cancel)
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(EngineError::PreconditionFailed("no model".into())) }
            })
            .await;

        assert!(matches!(result, Err(EngineError::PreconditionFailed(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_first_attempt_makes_no_call() {
        let calls = AtomicU32::new(0);
        let policy = policy(2);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<()> = RetryCoordinator::new(&policy, &cancel)
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert_eq!(result.unwrap_err(), EngineError::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn degenerate_factor_never_panics() {
        for factor in [f64::NAN, 1e30] {
            let calls = AtomicU32::new(0);
            let policy = RetryPolicy::new(3, Duration::from_millis(1), factor, Duration::from_secs(1));
            let cancel = CancellationToken::new();

            let trigger = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                trigger.cancel();
            });

            let result: Result<()> = RetryCoordinator::new(&policy, &cancel)
                .run(|_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(EngineError::Network("down".into())) }
                })
                .await;

            if factor.is_nan() {
                // Base delay every time, so all attempts run
                assert_eq!(result.unwrap_err(), EngineError::Network("down".into()));
                assert_eq!(calls.load(Ordering::SeqCst), 4);
            } else {
                // Backoff saturates; only cancellation ends the wait
                assert_eq!(result.unwrap_err(), EngineError::Cancelled);
                assert_eq!(calls.load(Ordering::SeqCst), 2);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_stops_retrying() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_secs(30), 2.0, Duration::from_secs(5));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result: Result<()> = RetryCoordinator::new(&policy, &cancel)
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(EngineError::Network("down".into())) }
            })
            .await;

        assert_eq!(result.unwrap_err(), EngineError::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(30));
    }
}
