//! Bounded retry with a flat base delay plus uniform jitter.
//!
//! Every wait between attempts is drawn from the same distribution,
//! `base_delay + uniform[0, jitter)`. There is no exponential growth. The loop
//! is explicit: each attempt yields an [`AttemptOutcome`] and the policy
//! decides whether another attempt follows.

use std::{future::Future, time::Duration};

use courier_core::Clock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::HttpDeliveryError;

/// Which delivery failures are eligible for another attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryOn {
    /// Retry every failure, including 4xx responses.
    #[default]
    AnyFailure,
    /// Retry only transport failures, 408, 429 and 5xx.
    TransientOnly,
}

/// Retry policy for delivery attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,

    /// Fixed part of every wait.
    pub base_delay: Duration,

    /// Upper bound (exclusive) of the random part of every wait.
    pub jitter: Duration,

    /// Failure classes that trigger another attempt.
    pub retry_on: RetryOn,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(3),
            jitter: Duration::from_secs(5),
            retry_on: RetryOn::AnyFailure,
        }
    }
}

/// Result of a single attempt as seen by the retry loop.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome<T, E> {
    /// The attempt succeeded; the loop stops.
    Success(T),
    /// The attempt failed and may be repeated.
    RetryableFailure(E),
    /// The attempt failed and must not be repeated.
    PermanentFailure(E),
}

/// Final result of a retry loop.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryRun<T, E> {
    /// Number of attempts made.
    pub attempts: u32,
    /// First success, or the error of the last attempt.
    pub result: Result<T, E>,
}

impl RetryPolicy {
    /// Draws the wait before the next attempt.
    pub fn next_delay(&self) -> Duration {
        self.base_delay + sample_jitter(self.jitter)
    }

    /// Classifies a delivery result according to [`RetryPolicy::retry_on`].
    pub fn classify<T>(
        &self,
        result: Result<T, HttpDeliveryError>,
    ) -> AttemptOutcome<T, HttpDeliveryError> {
        match result {
            Ok(value) => AttemptOutcome::Success(value),
            Err(error) => match self.retry_on {
                RetryOn::AnyFailure => AttemptOutcome::RetryableFailure(error),
                RetryOn::TransientOnly if error.is_transient() => {
                    AttemptOutcome::RetryableFailure(error)
                },
                RetryOn::TransientOnly => AttemptOutcome::PermanentFailure(error),
            },
        }
    }

    /// Runs `attempt` until it succeeds, fails permanently, or the attempt
    /// limit is reached.
    ///
    /// `attempt` receives the 1-based attempt number. Waits go through `clock`.
    /// The error of the last attempt is returned unchanged.
    pub async fn run<T, E, F, Fut>(&self, clock: &dyn Clock, mut attempt: F) -> RetryRun<T, E>
    where
        E: std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = AttemptOutcome<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt_number = 1;

        loop {
            match attempt(attempt_number).await {
                AttemptOutcome::Success(value) => {
                    return RetryRun { attempts: attempt_number, result: Ok(value) };
                },
                AttemptOutcome::PermanentFailure(error) => {
                    warn!(attempt = attempt_number, error = %error, "attempt failed permanently");
                    return RetryRun { attempts: attempt_number, result: Err(error) };
                },
                AttemptOutcome::RetryableFailure(error) if attempt_number >= max_attempts => {
                    warn!(
                        attempt = attempt_number,
                        max_attempts,
                        error = %error,
                        "attempts exhausted"
                    );
                    return RetryRun { attempts: attempt_number, result: Err(error) };
                },
                AttemptOutcome::RetryableFailure(error) => {
                    let delay = self.next_delay();
                    debug!(
                        attempt = attempt_number,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "attempt failed, waiting before retry"
                    );
                    clock.sleep(delay).await;
                    attempt_number += 1;
                },
            }
        }
    }
}

/// Uniform sample from `[0, jitter)`; zero when `jitter` is zero.
fn sample_jitter(jitter: Duration) -> Duration {
    let jitter_ns = u64::try_from(jitter.as_nanos()).unwrap_or(u64::MAX);
    if jitter_ns == 0 {
        return Duration::ZERO;
    }

    Duration::from_nanos(rand::rng().random_range(0..jitter_ns))
}

#[cfg(test)]
mod tests {
    use courier_core::TestClock;

    use super::*;

    #[test]
    fn delays_stay_within_base_plus_jitter() {
        let policy = RetryPolicy::default();

        for _ in 0..1_000 {
            let delay = policy.next_delay();
            assert!(delay >= Duration::from_secs(3), "delay too small: {delay:?}");
            assert!(delay < Duration::from_secs(8), "delay too large: {delay:?}");
        }
    }

    #[test]
    fn jitter_varies_delay() {
        let policy = RetryPolicy::default();
        let seen: std::collections::HashSet<_> =
            (0..20).map(|_| policy.next_delay().as_millis()).collect();

        assert!(seen.len() > 1, "jitter should create variation");
    }

    #[test]
    fn zero_jitter_gives_flat_delay() {
        let policy = RetryPolicy { jitter: Duration::ZERO, ..Default::default() };
        assert_eq!(policy.next_delay(), Duration::from_secs(3));
    }

    #[test]
    fn classification_follows_retry_on() {
        let any = RetryPolicy::default();
        let transient = RetryPolicy { retry_on: RetryOn::TransientOnly, ..Default::default() };
        let bad_request = || Err::<(), _>(HttpDeliveryError::status(400, "bad"));
        let unavailable = || Err::<(), _>(HttpDeliveryError::status(503, "down"));

        assert!(matches!(any.classify(bad_request()), AttemptOutcome::RetryableFailure(_)));
        assert!(matches!(
            transient.classify(bad_request()),
            AttemptOutcome::PermanentFailure(_)
        ));
        assert!(matches!(
            transient.classify(unavailable()),
            AttemptOutcome::RetryableFailure(_)
        ));
        assert_eq!(any.classify(Ok::<_, HttpDeliveryError>(1)), AttemptOutcome::Success(1));
    }

    #[tokio::test]
    async fn stops_at_first_success() {
        let clock = TestClock::new();
        let policy = RetryPolicy::default();

        let run = policy
            .run(&clock, |attempt| async move {
                if attempt < 3 {
                    AttemptOutcome::RetryableFailure(format!("failure {attempt}"))
                } else {
                    AttemptOutcome::Success(attempt)
                }
            })
            .await;

        assert_eq!(run.attempts, 3);
        assert_eq!(run.result, Ok(3));
        assert_eq!(clock.recorded_sleeps().len(), 2);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error() {
        let clock = TestClock::new();
        let policy = RetryPolicy::default();

        let run: RetryRun<(), String> = policy
            .run(&clock, |attempt| async move {
                AttemptOutcome::RetryableFailure(format!("failure {attempt}"))
            })
            .await;

        assert_eq!(run.attempts, 5);
        assert_eq!(run.result, Err("failure 5".to_string()));

        let sleeps = clock.recorded_sleeps();
        assert_eq!(sleeps.len(), 4, "no wait after the final attempt");
        for sleep in sleeps {
            assert!(sleep >= Duration::from_secs(3) && sleep < Duration::from_secs(8));
        }
    }

    #[tokio::test]
    async fn permanent_failure_stops_immediately() {
        let clock = TestClock::new();
        let policy = RetryPolicy::default();

        let run: RetryRun<(), &str> =
            policy.run(&clock, |_| async { AttemptOutcome::PermanentFailure("forbidden") }).await;

        assert_eq!(run.attempts, 1);
        assert_eq!(run.result, Err("forbidden"));
        assert!(clock.recorded_sleeps().is_empty());
    }

    #[tokio::test]
    async fn zero_max_attempts_still_attempts_once() {
        let clock = TestClock::new();
        let policy = RetryPolicy { max_attempts: 0, ..Default::default() };

        let run: RetryRun<(), &str> =
            policy.run(&clock, |_| async { AttemptOutcome::RetryableFailure("down") }).await;

        assert_eq!(run.attempts, 1);
    }
}
