//! Retry decisions
//!
//! Two layers:
//!
//! - `RetryPolicy` decides the built-in recovery for one classified failure.
//!   Each of Auth, Cors and Network gets at most one retry per call, tracked by
//!   `RetryMarkers` on the `Attempt`. Auth and Cors retry immediately with a
//!   forced credential refresh; Network waits a fixed delay and reuses the
//!   credential. Unknown failures are never retried.
//! - `retry_with_backoff` is the opt-in outer loop used by
//!   `ApiClient::call_with_retry`: a bounded number of whole calls with
//!   exponential spacing.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::classify::ErrorClass;
use crate::request::Attempt;

/// Which categories have already used their single retry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryMarkers {
    pub auth_retried: bool,
    pub cors_retried: bool,
    pub network_retried: bool,
}

impl RetryMarkers {
    pub fn already_retried(&self, class: ErrorClass) -> bool {
        match class {
            ErrorClass::Auth => self.auth_retried,
            ErrorClass::Cors => self.cors_retried,
            ErrorClass::Network => self.network_retried,
            ErrorClass::Unknown => true,
        }
    }

    fn mark(&mut self, class: ErrorClass) {
        match class {
            ErrorClass::Auth => self.auth_retried = true,
            ErrorClass::Cors => self.cors_retried = true,
            ErrorClass::Network => self.network_retried = true,
            ErrorClass::Unknown => {}
        }
    }
}

impl Attempt {
    /// Record that a retry for `class` is about to be issued.
    pub fn mark_retry(&mut self, class: ErrorClass) {
        self.markers.mark(class);
        self.retry_count += 1;
    }
}

/// What to do with the credential before retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Obtain a new credential, bypassing the cache.
    ForceRefresh,
    /// Send the same credential again.
    ReuseCredential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration, recovery: Recovery },
    GiveUp,
}

impl RetryDecision {
    pub fn should_retry(&self) -> bool {
        matches!(self, RetryDecision::Retry { .. })
    }

    pub fn delay(&self) -> Duration {
        match self {
            RetryDecision::Retry { delay, .. } => *delay,
            RetryDecision::GiveUp => Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    network_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl RetryPolicy {
    pub fn new(network_delay: Duration) -> Self {
        Self { network_delay }
    }

    pub fn should_retry(&self, attempt: &Attempt, class: ErrorClass) -> RetryDecision {
        if attempt.markers.already_retried(class) {
            return RetryDecision::GiveUp;
        }
        match class {
            ErrorClass::Auth | ErrorClass::Cors => RetryDecision::Retry {
                delay: Duration::ZERO,
                recovery: Recovery::ForceRefresh,
            },
            ErrorClass::Network => RetryDecision::Retry {
                delay: self.network_delay,
                recovery: Recovery::ReuseCredential,
            },
            ErrorClass::Unknown => RetryDecision::GiveUp,
        }
    }
}

/// Exponential spacing for the opt-in outer retry: attempt `i` (0-based) is
/// followed by a wait of `base * 2^i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max_attempts: u32,
}

impl Backoff {
    /// `max_attempts` counts total attempts; zero is treated as one.
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt_index).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor)
    }
}

/// Run `operation` up to `backoff.max_attempts()` times, sleeping between
/// attempts, until it succeeds or fails with an error `retryable` rejects.
/// The last error is returned.
pub async fn retry_with_backoff<T, E, F, Fut, P>(
    backoff: Backoff,
    mut operation: F,
    retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: fmt::Display,
{
    let mut index = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if index + 1 < backoff.max_attempts && retryable(&e) => {
                let delay = backoff.delay_for(index);
                warn!(
                    attempt = index + 1,
                    max_attempts = backoff.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "attempt failed, backing off"
                );
                tokio::time::sleep(delay).await;
                index += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Method, QueryParams};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn attempt() -> Attempt {
        Attempt::new(Method::Get, "/organization", None, QueryParams::new())
    }

    #[test]
    fn auth_and_cors_force_refresh_immediately() {
        let policy = RetryPolicy::new(Duration::from_millis(500));
        for class in [ErrorClass::Auth, ErrorClass::Cors] {
            assert_eq!(
                policy.should_retry(&attempt(), class),
                RetryDecision::Retry {
                    delay: Duration::ZERO,
                    recovery: Recovery::ForceRefresh
                }
            );
        }
    }

    #[test]
    fn network_waits_and_reuses_credential() {
        let policy = RetryPolicy::new(Duration::from_millis(500));
        let decision = policy.should_retry(&attempt(), ErrorClass::Network);
        assert!(decision.should_retry());
        assert_eq!(decision.delay(), Duration::from_millis(500));
        assert_eq!(
            decision,
            RetryDecision::Retry {
                delay: Duration::from_millis(500),
                recovery: Recovery::ReuseCredential
            }
        );
    }

    #[test]
    fn unknown_is_never_retried() {
        let decision = RetryPolicy::default().should_retry(&attempt(), ErrorClass::Unknown);
        assert_eq!(decision, RetryDecision::GiveUp);
        assert_eq!(decision.delay(), Duration::ZERO);
    }

    #[test]
    fn each_class_retries_once() {
        let policy = RetryPolicy::default();
        let mut attempt = attempt();

        attempt.mark_retry(ErrorClass::Auth);
        assert_eq!(policy.should_retry(&attempt, ErrorClass::Auth), RetryDecision::GiveUp);
        // Other categories still have their retry
        assert!(policy.should_retry(&attempt, ErrorClass::Network).should_retry());

        attempt.mark_retry(ErrorClass::Network);
        attempt.mark_retry(ErrorClass::Cors);
        assert_eq!(attempt.retry_count, 3);
        for class in [ErrorClass::Auth, ErrorClass::Cors, ErrorClass::Network] {
            assert!(!policy.should_retry(&attempt, class).should_retry());
        }
    }

    #[test]
    fn backoff_doubles_from_base() {
        let backoff = Backoff::new(Duration::from_secs(1), 3);
        assert_eq!(backoff.delay_for(0), Duration::from_secs(1));
        assert_eq!(backoff.delay_for(1), Duration::from_secs(2));
        assert_eq!(backoff.delay_for(2), Duration::from_secs(4));
        // Saturates instead of overflowing
        assert!(backoff.delay_for(64) >= Duration::from_secs(u32::MAX as u64));
        assert_eq!(Backoff::new(Duration::from_secs(1), 0).max_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_with_backoff_succeeds_after_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = tokio::time::Instant::now();

        let result: Result<&str, String> = retry_with_backoff(
            Backoff::new(Duration::from_secs(1), 3),
            || {
                let calls = Arc::clone(&calls);
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 { Err(format!("fail {n}")) } else { Ok("done") }
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s after the first attempt, 2s after the second
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_with_backoff_returns_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<(), String> = retry_with_backoff(
            Backoff::new(Duration::from_millis(10), 2),
            || {
                let calls = Arc::clone(&calls);
                async move { Err(format!("fail {}", calls.fetch_add(1, Ordering::SeqCst))) }
            },
            |_| true,
        )
        .await;

        assert_eq!(result.unwrap_err(), "fail 1");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_with_backoff_stops_on_non_retryable() {
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<(), String> = retry_with_backoff(
            Backoff::new(Duration::from_secs(1), 5),
            || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("fatal".to_string())
                }
            },
            |e| e != "fatal",
        )
        .await;

        assert_eq!(result.unwrap_err(), "fatal");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
