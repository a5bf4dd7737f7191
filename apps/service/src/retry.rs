//! Retry with exponential backoff, shared by the metrics writer and the
//! alert dispatcher.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::warn;

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
    /// Exponential backoff multiplier.
    pub backoff_multiplier: f64,
    /// Spread delays by up to +/-10%.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), base_delay, max_delay, ..Self::default() }
    }

    /// Delay to wait after the given (zero based) failed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let delay = delay.min(self.max_delay.as_millis() as f64);

        let delay_ms = if self.jitter && delay > 0.0 {
            let spread = delay * 0.1;
            (delay + rand::thread_rng().gen_range(-spread..=spread)).max(0.0)
        } else {
            delay
        };

        Duration::from_millis(delay_ms as u64)
    }
}

/// Run `operation` until it succeeds, the error is not retryable, or attempts
/// run out. The attempt number passed to `operation` starts at 1.
///
/// Returns the value or the last error, together with the attempts used.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    is_retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<(T, u32), (E, u32)>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => return Ok((value, attempt)),
            Err(e) => {
                if attempt >= max_attempts || !is_retryable(&e) {
                    return Err((e, attempt));
                }

                let delay = policy.delay_for_attempt(attempt - 1);
                warn!(
                    "{} failed (attempt {}/{}): {}, retrying in {:?}",
                    label, attempt, max_attempts, e, delay
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn delays_grow_and_are_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
            jitter: false,
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(60), Duration::from_millis(1000));
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let policy = RetryPolicy { jitter: true, ..fast_policy(3) };
        let policy = RetryPolicy { base_delay: Duration::from_millis(1000), max_delay: Duration::from_secs(10), ..policy };

        for _ in 0..50 {
            let delay = policy.delay_for_attempt(0).as_millis();
            assert!((900..=1100).contains(&delay), "delay {delay} out of range");
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);

        let outcome = retry_with_backoff(&fast_policy(5), "op", |_: &String| true, |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { if n < 2 { Err("boom".to_string()) } else { Ok(n) } }
        })
        .await;

        assert_eq!(outcome, Ok((2, 3)));
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let outcome: Result<((), u32), (String, u32)> =
            retry_with_backoff(&fast_policy(3), "op", |_| true, |attempt| async move {
                Err(format!("attempt {attempt}"))
            })
            .await;

        assert_eq!(outcome, Err(("attempt 3".to_string(), 3)));
    }

    #[tokio::test]
    async fn stops_on_permanent_errors() {
        let outcome: Result<((), u32), (String, u32)> = retry_with_backoff(
            &fast_policy(5),
            "op",
            |e: &String| e != "permanent",
            |_| async { Err("permanent".to_string()) },
        )
        .await;

        assert_eq!(outcome, Err(("permanent".to_string(), 1)));
    }
}
