use std::{future::Future, time::Duration};

use tracing::warn;

use crate::error::RetryError;

/// Configuration for [`retry_with_backoff`], mirroring the
/// `@retry_with_backoff(max_retries=..., initial_delay=...)` decorator used
/// throughout the original daemon's hardware-init paths.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt.
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }
}

/// Runs `f`, retrying on failure per `policy` with exponential backoff.
///
/// Returns the last error wrapped in [`RetryError::Exhausted`] once
/// `max_retries` attempts have all failed. An attempt count of 0 means "try
/// once, no retries".
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: RetryPolicy,
    mut f: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut delay = policy.initial_delay;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return Ok(value),
            Err(source) => {
                if attempt > policy.max_retries {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        source,
                    });
                }
                warn!(attempt, ?delay, "retrying after failure");
                tokio::time::sleep(delay).await;
                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * policy.backoff_multiplier)
                        .min(policy.max_delay.as_secs_f64()),
                );
            }
        }
    }
}

/// Uncapped backoff loop used by hardware reinit threads: tries `f` forever,
/// doubling the delay each time starting from `initial_delay` up to
/// `max_delay`, returning as soon as `f` succeeds. Mirrors
/// `io_manager.py`'s `_start_reinit_thread` reinit loop (2s -> 4s -> ... ->
/// 60s cap, never gives up).
pub async fn retry_forever_until_success<F, Fut, T, E>(
    initial_delay: Duration,
    max_delay: Duration,
    mut f: F,
) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut delay = initial_delay;
    loop {
        match f().await {
            Ok(value) => return value,
            Err(_) => {
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(max_delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn succeeds_without_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<i32, RetryError<&str>> = retry_with_backoff(
            RetryPolicy::new(3, Duration::from_millis(1)),
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            },
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result: Result<i32, RetryError<&str>> = retry_with_backoff(
            RetryPolicy::new(3, Duration::from_millis(1)),
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 { Err("not yet") } else { Ok(7) }
            },
        )
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_retries() {
        let result: Result<i32, RetryError<&str>> = retry_with_backoff(
            RetryPolicy::new(2, Duration::from_millis(1)),
            || async { Err("nope") },
        )
        .await;
        match result {
            Err(RetryError::Exhausted { attempts, .. }) => assert_eq!(attempts, 3),
            Ok(_) => panic!("expected failure"),
        }
    }
}
