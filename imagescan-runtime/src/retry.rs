//! Bounded retries for scanner calls
use std::{future::Future, time::Duration};

use backon::{BackoffBuilder, ConstantBuilder};
use serde::Deserialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::ScanError;

/// How often, how fast and for how long a scanner call is retried.
///
/// The delay between attempts is constant. Only errors for which
/// [`ScanError::is_retryable`] holds are retried.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Total number of calls, including the first one.
    pub max_attempts: usize,
    /// Pause between two calls.
    #[serde(with = "millis", rename = "delayMs")]
    pub delay: Duration,
    /// Wall-clock budget for the whole loop.
    #[serde(with = "opt_millis", rename = "deadlineMs")]
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(1),
            deadline: None,
        }
    }
}

impl RetryPolicy {
    /// Delays to wait after each failed attempt; yields one entry fewer than attempts.
    fn delays(&self) -> impl Iterator<Item = Duration> {
        ConstantBuilder::default()
            .with_delay(self.delay)
            .with_max_times(self.max_attempts.saturating_sub(1))
            .build()
    }

    /// Run `op` until it succeeds, fails terminally, or the policy gives up.
    ///
    /// `op` receives the 1-based attempt number. Cancelling `cancel` or running
    /// past the deadline abandons an in-flight call and returns immediately.
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> Result<T, ScanError>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, ScanError>>,
    {
        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }
        let budget = self.deadline.unwrap_or_default();
        let expires_at = self.deadline.map(|d| Instant::now() + d);
        let mut delays = self.delays();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ScanError::Cancelled),
                () = expire(expires_at) => return Err(ScanError::DeadlineExceeded(budget)),
                res = op(attempt) => res,
            };
            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => err,
            };
            let Some(delay) = delays.next() else {
                return Err(ScanError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            };
            tracing::debug!(attempt, ?delay, error = %err, "retrying scanner call");
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ScanError::Cancelled),
                () = expire(expires_at) => return Err(ScanError::DeadlineExceeded(budget)),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

async fn expire(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|ms| ms.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    fn pending() -> ScanError {
        ScanError::DigestPending("nginx".into())
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success_with_constant_delay() {
        let policy = RetryPolicy::default();
        let start = Instant::now();
        let res = policy
            .run(&CancellationToken::new(), |attempt| async move {
                if attempt < 3 {
                    Err(pending())
                } else {
                    Ok("sha256:abc")
                }
            })
            .await;
        assert_eq!(res.unwrap(), "sha256:abc");
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = RetryPolicy::default();
        let res: Result<(), _> = policy
            .run(&CancellationToken::new(), |_| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(pending())
                }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert!(matches!(res, Err(ScanError::RetriesExhausted { attempts: 5, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_errors_are_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let res: Result<(), _> = RetryPolicy::default()
            .run(&CancellationToken::new(), |_| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ScanError::backend("unauthorized"))
                }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(res, Err(ScanError::Backend(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_loop() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            trigger.cancel();
        });
        let calls = Arc::new(AtomicUsize::new(0));
        let res: Result<(), _> = RetryPolicy::default()
            .run(&cancel, |_| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(pending())
                }
            })
            .await;
        assert!(matches!(res, Err(ScanError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancelled_token_skips_the_call() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = AtomicUsize::new(0);
        let res: Result<(), _> = RetryPolicy::default()
            .run(&cancel, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert!(matches!(res, Err(ScanError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_abandons_slow_calls() {
        let policy = RetryPolicy {
            deadline: Some(Duration::from_millis(500)),
            ..RetryPolicy::default()
        };
        let res: Result<(), _> = policy
            .run(&CancellationToken::new(), |_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;
        assert!(matches!(res, Err(ScanError::DeadlineExceeded(d)) if d == Duration::from_millis(500)));
    }

    #[test]
    fn deserializes_with_defaults() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"maxAttempts": 3, "deadlineMs": 2000}"#).unwrap();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay, Duration::from_secs(1));
        assert_eq!(policy.deadline, Some(Duration::from_secs(2)));
    }
}
