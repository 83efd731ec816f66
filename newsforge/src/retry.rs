//! Bounded retry with backoff, shared by feed fetches, model calls, TTS and email.

use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Delay inserted after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    None,
    Fixed(Duration),
    /// `unit * n` after the n-th failure
    Linear(Duration),
    /// `base * 2^(n-1)` after the n-th failure, capped at `max`
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay after the `failed_attempt`-th failure (1-based).
    pub fn delay(&self, failed_attempt: u32) -> Duration {
        let n = failed_attempt.max(1);
        match *self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(d) => d,
            Backoff::Linear(unit) => unit.saturating_mul(n),
            Backoff::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(n - 1);
                base.saturating_mul(factor).min(max)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::model_calls()
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Single attempt, no waiting.
    pub fn once() -> Self {
        Self::new(1, Backoff::None)
    }

    /// Two attempts, waiting 2s after the first failure.
    pub fn model_calls() -> Self {
        Self::new(2, Backoff::Linear(Duration::from_secs(2)))
    }

    /// Three attempts, waiting 1s then 2s.
    pub fn feed_fetches() -> Self {
        Self::new(
            3,
            Backoff::Exponential {
                base: Duration::from_secs(1),
                max: Duration::from_secs(30),
            },
        )
    }

    /// Retry every error.
    pub async fn run<T, E, F, Fut>(&self, label: &str, op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.run_when(label, |_| true, op).await
    }

    /// Retry only errors for which `is_retryable` holds; the first other error is
    /// returned straight away. `op` receives the 1-based attempt number.
    pub async fn run_when<T, E, F, Fut, P>(
        &self,
        label: &str,
        is_retryable: P,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt >= max_attempts || !is_retryable(&err) {
                        return Err(RetryError { attempts: attempt, last: err });
                    }
                    let delay = self.backoff.delay(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {}",
                        label, attempt, max_attempts, err
                    );
                    if !delay.is_zero() {
                        info!("Retrying {} after {:?}...", label, delay);
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}

/// All attempts failed, or a non-retryable error stopped the loop.
#[derive(Debug)]
pub struct RetryError<E> {
    pub attempts: u32,
    pub last: E,
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed after {} attempt(s): {}", self.attempts, self.last)
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_delays() {
        let linear = Backoff::Linear(Duration::from_secs(2));
        assert_eq!(linear.delay(1), Duration::from_secs(2));
        assert_eq!(linear.delay(3), Duration::from_secs(6));

        let exp = Backoff::Exponential {
            base: Duration::from_secs(1),
            max: Duration::from_secs(5),
        };
        assert_eq!(exp.delay(1), Duration::from_secs(1));
        assert_eq!(exp.delay(2), Duration::from_secs(2));
        assert_eq!(exp.delay(3), Duration::from_secs(4));
        assert_eq!(exp.delay(4), Duration::from_secs(5));
        assert_eq!(Backoff::None.delay(7), Duration::ZERO);
    }

    #[test]
    fn zero_attempts_means_one() {
        assert_eq!(RetryPolicy::new(0, Backoff::None).max_attempts, 1);
    }

    #[tokio::test]
    async fn stops_after_max_attempts() {
        let policy = RetryPolicy::new(2, Backoff::None);
        let mut calls = 0;
        let result: Result<(), _> = policy
            .run("always-fails", |_| {
                calls += 1;
                async { Err::<(), _>("boom") }
            })
            .await;
        let err = result.unwrap_err();
        assert_eq!(err.attempts, 2);
        assert_eq!(err.last, "boom");
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn succeeds_on_later_attempt() {
        let policy = RetryPolicy::new(3, Backoff::Fixed(Duration::from_millis(1)));
        let value = policy
            .run("flaky", |attempt| async move {
                if attempt < 3 {
                    Err(format!("attempt {attempt} failed"))
                } else {
                    Ok(attempt)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test]
    async fn non_retryable_error_stops_immediately() {
        let policy = RetryPolicy::new(5, Backoff::None);
        let mut calls = 0;
        let err = policy
            .run_when("client-error", |e: &u16| *e >= 500, |_| {
                calls += 1;
                async { Err::<(), u16>(404) }
            })
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(err.last, 404);
        assert_eq!(calls, 1);
    }
}
