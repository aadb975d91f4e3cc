//! In-place retry with jittered backoff.
//!
//! Transient engine errors (busy/locked) are retried where they happen,
//! up to a bounded attempt count. Which errors count as transient is the
//! engine's call, see [`crate::storage::engine::RetryPredicate`].

use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Retry bounds for one statement.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Nominal delay between attempts.
    pub base_delay: Duration,
    /// Relative jitter applied to `base_delay`, in `[0, 1)`.
    pub deviation: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 500,
            base_delay: Duration::from_millis(2),
            deviation: 0.3,
        }
    }
}

/// A failure after one or more attempts.
#[derive(Debug)]
pub struct RetryError<E> {
    pub error: E,
    pub attempts: u32,
    /// The last error was transient but the attempt budget ran out.
    pub exhausted: bool,
}

impl RetryPolicy {
    /// Policy with `max_attempts` and the default backoff.
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// One jittered delay.
    pub fn delay(&self) -> Duration {
        jitter(self.base_delay, self.deviation)
    }

    /// Run `attempt` until it succeeds, fails with a non-transient error,
    /// or the attempt budget is spent.
    pub async fn run<T, E, F, Fut>(
        &self,
        is_transient: impl Fn(&E) -> bool,
        mut attempt: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut n = 0;
        loop {
            n += 1;
            match attempt(n).await {
                Ok(value) => return Ok(value),
                Err(error) if is_transient(&error) && n < self.max_attempts => {
                    tokio::time::sleep(self.delay()).await;
                }
                Err(error) => {
                    let exhausted = is_transient(&error);
                    return Err(RetryError {
                        error,
                        attempts: n,
                        exhausted,
                    });
                }
            }
        }
    }
}

/// `base` scaled by a random factor in `[1 - deviation, 1 + deviation]`.
pub fn jitter(base: Duration, deviation: f64) -> Duration {
    let deviation = deviation.clamp(0.0, 0.99);
    if deviation == 0.0 {
        return base;
    }
    let factor = rand::rng().random_range((1.0 - deviation)..=(1.0 + deviation));
    base.mul_f64(factor)
}
