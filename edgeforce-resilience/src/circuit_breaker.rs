use std::{
    future::Future,
    sync::atomic::{AtomicU32, Ordering},
    time::{Duration, Instant},
};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::BreakerError;

/// The three states of a [`CircuitBreaker`], matching the classic
/// closed/open/half-open state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: BreakerState,
    opened_at: Option<Instant>,
}

/// A circuit breaker guarding a fallible operation (hardware I/O, a remote
/// connect, a device read).
///
/// Once `failure_threshold` consecutive failures are observed the breaker
/// opens and fails fast for `timeout`, after which a single probe call is
/// allowed through (half-open); success closes the breaker, failure reopens
/// it and resets the timeout.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    timeout: Duration,
    failure_count: AtomicU32,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("failure_threshold", &self.failure_threshold)
            .field("timeout", &self.timeout)
            .field("failure_count", &self.failure_count.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(name: impl Into<String>, failure_threshold: u32, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold,
            timeout,
            failure_count: AtomicU32::new(0),
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                opened_at: None,
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn state(&self) -> BreakerState {
        self.inner.lock().await.state
    }

    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Relaxed)
    }

    /// Runs `f`, guarded by the breaker.
    ///
    /// If the breaker is open and `timeout` hasn't elapsed yet, `f` is never
    /// invoked and [`BreakerError::Open`] is returned. Otherwise `f` runs;
    /// success resets the failure count and closes the breaker, failure
    /// increments the count and opens the breaker once `failure_threshold`
    /// is reached.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        {
            let mut guard = self.inner.lock().await;
            match guard.state {
                BreakerState::Open => {
                    let opened_at = guard.opened_at.unwrap_or_else(Instant::now);
                    if opened_at.elapsed() >= self.timeout {
                        guard.state = BreakerState::HalfOpen;
                        debug!(breaker = %self.name, "half-open probe allowed");
                    } else {
                        let retry_after = self.timeout - opened_at.elapsed();
                        return Err(BreakerError::Open {
                            name: self.name.clone(),
                            retry_after,
                        });
                    }
                }
                // A probe is already in flight for this half-open window;
                // only the single caller that made the Open -> HalfOpen
                // transition above is allowed through. Every other
                // concurrent caller fails fast until that probe resolves
                // (on_success/on_failure moves the state to Closed/Open).
                BreakerState::HalfOpen => {
                    return Err(BreakerError::Open {
                        name: self.name.clone(),
                        retry_after: Duration::ZERO,
                    });
                }
                BreakerState::Closed => {}
            }
        }

        match f().await {
            Ok(value) => {
                self.on_success().await;
                Ok(value)
            }
            Err(err) => {
                self.on_failure().await;
                Err(BreakerError::Inner(err))
            }
        }
    }

    /// Records a success, as if a `call` had completed one. Used when the
    /// caller performs its own I/O (e.g. a liveness loop reading a status
    /// register directly) but still wants the breaker's bookkeeping.
    pub async fn on_success(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
        let mut guard = self.inner.lock().await;
        if guard.state != BreakerState::Closed {
            debug!(breaker = %self.name, "closing after success");
        }
        guard.state = BreakerState::Closed;
        guard.opened_at = None;
    }

    /// Records a failure without running an operation. Mirrors
    /// `CircuitBreaker._on_failure` in the Python original, used by CAN's
    /// device-level timeout handling which reports failures observed
    /// out-of-band from a liveness sweep rather than from a wrapped call.
    pub async fn on_failure(&self) {
        let count = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count >= self.failure_threshold {
            let mut guard = self.inner.lock().await;
            if guard.state != BreakerState::Open {
                warn!(breaker = %self.name, failures = count, "opening circuit breaker");
            }
            guard.state = BreakerState::Open;
            guard.opened_at = Some(Instant::now());
        }
    }

    /// Forces the breaker back to closed, clearing failure history. Not used
    /// by the Modbus cleanup path (which intentionally preserves breaker
    /// state, see DESIGN.md), but available for administrative reset
    /// endpoints.
    pub async fn reset(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
        let mut guard = self.inner.lock().await;
        guard.state = BreakerState::Closed;
        guard.opened_at = None;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new("test", 3, Duration::from_secs(30));

        for _ in 0..3 {
            let result: Result<(), BreakerError<&str>> =
                breaker.call(|| async { Err("boom") }).await;
            assert!(result.is_err());
        }

        assert_eq!(breaker.state().await, BreakerState::Open);

        let result: Result<(), BreakerError<&str>> = breaker.call(|| async { Ok(()) }).await;
        assert!(matches!(result, Err(BreakerError::Open { .. })));
    }

    #[tokio::test]
    async fn half_open_probe_closes_on_success() {
        let breaker = CircuitBreaker::new("test", 1, Duration::from_millis(10));

        let _: Result<(), BreakerError<&str>> = breaker.call(|| async { Err("boom") }).await;
        assert_eq!(breaker.state().await, BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;

        let result: Result<(), BreakerError<&str>> = breaker.call(|| async { Ok(()) }).await;
        assert!(result.is_ok());
        assert_eq!(breaker.state().await, BreakerState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_callers_during_half_open_only_run_one_probe() {
        let breaker = Arc::new(CircuitBreaker::new("test", 1, Duration::from_millis(10)));

        let _: Result<(), BreakerError<&str>> = breaker.call(|| async { Err("boom") }).await;
        assert_eq!(breaker.state().await, BreakerState::Open);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let in_flight = Arc::new(AtomicU32::new(0));
        let concurrent_peak = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();
        for _ in 0..5 {
            let breaker = Arc::clone(&breaker);
            let in_flight = Arc::clone(&in_flight);
            let concurrent_peak = Arc::clone(&concurrent_peak);
            handles.push(tokio::spawn(async move {
                let result: Result<(), BreakerError<&str>> = breaker
                    .call(|| async {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        concurrent_peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await;
                result
            }));
        }

        let mut ok_count = 0;
        let mut fast_failed_count = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => ok_count += 1,
                Err(BreakerError::Open { .. }) => fast_failed_count += 1,
                Err(BreakerError::Inner(_)) => panic!("probe body never fails in this test"),
            }
        }

        assert_eq!(concurrent_peak.load(Ordering::SeqCst), 1, "only one probe body ran at a time");
        assert_eq!(ok_count, 1, "exactly one caller is let through during half-open");
        assert_eq!(fast_failed_count, 4, "the rest fail fast without running the guarded action");
        assert_eq!(breaker.state().await, BreakerState::Closed);
    }

    #[tokio::test]
    async fn concurrent_failures_only_open_once() {
        let breaker = Arc::new(CircuitBreaker::new("test", 5, Duration::from_secs(30)));
        let mut handles = Vec::new();
        for _ in 0..5 {
            let breaker = Arc::clone(&breaker);
            handles.push(tokio::spawn(async move { breaker.on_failure().await }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(breaker.state().await, BreakerState::Open);
        assert_eq!(breaker.failure_count(), 5);
    }
}
