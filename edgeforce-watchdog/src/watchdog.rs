use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use chrono::Utc;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{error, info, warn};

use crate::types::{
    ComponentStatus, WatchdogComponent, WatchdogComponentReport, WatchdogReport,
    WatchdogSelfReport,
};

/// A registered health check: returns `true` if the component is healthy.
/// Boxed so `register_component` can take any async closure, mirroring
/// `watchdog.py`'s `register_component(name, health_check)` accepting any
/// zero-argument callable.
pub type HealthCheck =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = bool> + Send>> + Send + Sync>;

/// How many consecutive 1s ticks make up the 10s health-sweep cadence.
/// Counting ticks rather than re-deriving from wall-clock modulo avoids the
/// `int(time.time()) % 10 == 0` coincidence-timing quirk in the original.
const SWEEP_EVERY_TICKS: u32 = 10;

struct Feed {
    instant: Instant,
    wall: chrono::DateTime<Utc>,
}

/// Supervisory watchdog: a `last_feed` timestamp fed by the main loop each
/// iteration, a registry of named pull-style health checks, and a
/// configurable timeout. If the feed goes stale the watchdog counts a
/// timeout, runs every registered health check once, logs the unhealthy
/// ones, and invokes `on_timeout`.
///
/// Grounded on `watchdog.py`'s `WatchdogTimer` in full.
pub struct Watchdog {
    timeout: Duration,
    on_timeout: Option<Box<dyn Fn() + Send + Sync>>,
    feed: Mutex<Feed>,
    running: AtomicBool,
    timeout_count: AtomicU64,
    components: Mutex<HashMap<String, (HealthCheck, WatchdogComponent)>>,
}

impl std::fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchdog")
            .field("timeout", &self.timeout)
            .field("running", &self.running.load(Ordering::Relaxed))
            .field("timeout_count", &self.timeout_count.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Watchdog {
    #[must_use]
    pub fn new(timeout: Duration) -> Arc<Self> {
        let now = Instant::now();
        Arc::new(Self {
            timeout,
            on_timeout: None,
            feed: Mutex::new(Feed {
                instant: now,
                wall: Utc::now(),
            }),
            running: AtomicBool::new(false),
            timeout_count: AtomicU64::new(0),
            components: Mutex::new(HashMap::new()),
        })
    }

    /// Installs a callback invoked (synchronously, from the watchdog's own
    /// loop task) each time a timeout is detected, after the health sweep
    /// has already run and logged unhealthy components.
    #[must_use]
    pub fn with_on_timeout(mut self: Arc<Self>, handler: impl Fn() + Send + Sync + 'static) -> Arc<Self> {
        Arc::get_mut(&mut self)
            .expect("with_on_timeout must be called before the watchdog is shared")
            .on_timeout = Some(Box::new(handler));
        self
    }

    /// Resets the feed timer. Called by the gateway's main loop on every
    /// iteration so that a stalled loop is observable as a watchdog timeout.
    pub async fn feed(&self) {
        let mut feed = self.feed.lock().await;
        feed.instant = Instant::now();
        feed.wall = Utc::now();
    }

    /// Registers a named pull-style health check, replacing any existing
    /// check under the same name.
    pub async fn register_component(&self, name: impl Into<String>, check: HealthCheck) {
        let name = name.into();
        self.components
            .lock()
            .await
            .insert(name.clone(), (check, WatchdogComponent::default()));
        info!(component = %name, "watchdog: registered component");
    }

    /// Runs a single component's health check and records the result.
    /// Returns `false` for both an unhealthy result and an unregistered
    /// component name.
    pub async fn check_component_health(&self, name: &str) -> bool {
        let check = {
            let components = self.components.lock().await;
            match components.get(name) {
                Some((check, _)) => Arc::clone(check),
                None => {
                    warn!(component = name, "watchdog: unknown component");
                    return false;
                }
            }
        };

        let healthy = check().await;
        let mut components = self.components.lock().await;
        if let Some((_, record)) = components.get_mut(name) {
            record.last_check = Some(Utc::now());
            if healthy {
                record.status = ComponentStatus::Healthy;
                record.failures = 0;
            } else {
                record.status = ComponentStatus::Unhealthy;
                record.failures += 1;
                warn!(component = name, failures = record.failures, "watchdog: component unhealthy");
            }
        }
        healthy
    }

    /// Runs every registered health check once, returning each component's
    /// result.
    pub async fn check_all_components(&self) -> HashMap<String, bool> {
        let names: Vec<String> = self.components.lock().await.keys().cloned().collect();
        let mut results = HashMap::with_capacity(names.len());
        for name in names {
            let healthy = self.check_component_health(&name).await;
            results.insert(name, healthy);
        }
        results
    }

    /// Full `{watchdog, components}` report, per `watchdog.py`'s
    /// `get_health_report`.
    pub async fn health_report(&self) -> WatchdogReport {
        let feed = self.feed.lock().await;
        let time_since_feed = feed.instant.elapsed();
        let watchdog_status = if time_since_feed < self.timeout { "healthy" } else { "timeout" };

        let components = self
            .components
            .lock()
            .await
            .iter()
            .map(|(name, (_, record))| {
                (
                    name.clone(),
                    WatchdogComponentReport {
                        status: record.status.as_str(),
                        last_check: record.last_check,
                        failures: record.failures,
                    },
                )
            })
            .collect();

        WatchdogReport {
            watchdog: WatchdogSelfReport {
                running: self.running.load(Ordering::Relaxed),
                timeout_secs: self.timeout.as_secs(),
                last_feed: feed.wall,
                time_since_feed_secs: time_since_feed.as_secs_f64(),
                timeout_count: self.timeout_count.load(Ordering::Relaxed),
                status: watchdog_status,
            },
            components,
        }
    }

    #[must_use]
    pub fn timeout_count(&self) -> u64 {
        self.timeout_count.load(Ordering::Relaxed)
    }

    /// Spawns the 1Hz supervisory loop. Returns a handle the caller can
    /// `.await` after calling [`Watchdog::stop`].
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::Relaxed);
        let watchdog = Arc::clone(self);
        info!(timeout = ?self.timeout, "starting watchdog supervisor");
        tokio::spawn(async move {
            let mut ticks_since_sweep: u32 = 0;
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            while watchdog.running.load(Ordering::Relaxed) {
                interval.tick().await;
                if !watchdog.running.load(Ordering::Relaxed) {
                    break;
                }

                let time_since_feed = {
                    let feed = watchdog.feed.lock().await;
                    feed.instant.elapsed()
                };

                if time_since_feed >= watchdog.timeout {
                    let count = watchdog.timeout_count.fetch_add(1, Ordering::Relaxed) + 1;
                    error!(?time_since_feed, timeout_count = count, "watchdog timeout");

                    let results = watchdog.check_all_components().await;
                    let unhealthy: Vec<&str> = results
                        .iter()
                        .filter(|(_, healthy)| !**healthy)
                        .map(|(name, _)| name.as_str())
                        .collect();
                    if !unhealthy.is_empty() {
                        error!(?unhealthy, "watchdog: unhealthy components at timeout");
                    }

                    if let Some(handler) = &watchdog.on_timeout {
                        handler();
                    }

                    let mut feed = watchdog.feed.lock().await;
                    feed.instant = Instant::now();
                    feed.wall = Utc::now();
                    ticks_since_sweep = 0;
                    continue;
                }

                ticks_since_sweep += 1;
                if ticks_since_sweep >= SWEEP_EVERY_TICKS {
                    ticks_since_sweep = 0;
                    watchdog.check_all_components().await;
                }
            }
            info!("watchdog supervisor loop stopped");
        })
    }

    /// Stops the supervisory loop. The caller should `.await` the
    /// `JoinHandle` returned by `start` with a 2-5s timeout per spec.md §5's
    /// cancellation contract; an exceeded join is logged but never blocks
    /// shutdown.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering as O};

    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn feeding_resets_time_since_feed() {
        let watchdog = Watchdog::new(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_millis(5)).await;
        watchdog.feed().await;
        let report = watchdog.health_report().await;
        assert_eq!(report.watchdog.status, "healthy");
        assert!(report.watchdog.time_since_feed_secs < 60.0);
    }

    #[tokio::test]
    async fn registered_component_check_runs_and_tracks_failures() {
        let watchdog = Watchdog::new(Duration::from_secs(60));
        let fail_calls = Arc::new(AtomicU32::new(0));
        let calls = Arc::clone(&fail_calls);
        watchdog
            .register_component(
                "modbus",
                Arc::new(move || {
                    let calls = Arc::clone(&calls);
                    Box::pin(async move {
                        calls.fetch_add(1, O::SeqCst);
                        false
                    })
                }),
            )
            .await;

        assert!(!watchdog.check_component_health("modbus").await);
        assert!(!watchdog.check_component_health("modbus").await);

        let report = watchdog.health_report().await;
        let modbus = &report.components["modbus"];
        assert_eq!(modbus.status, "unhealthy");
        assert_eq!(modbus.failures, 2);
        assert_eq!(fail_calls.load(O::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_component_check_returns_false() {
        let watchdog = Watchdog::new(Duration::from_secs(60));
        assert!(!watchdog.check_component_health("ghost").await);
    }

    #[tokio::test]
    async fn timeout_increments_count_and_invokes_handler() {
        let watchdog = Watchdog::new(Duration::from_millis(20)).with_on_timeout(|| {});
        let handle = watchdog.start();
        tokio::time::sleep(Duration::from_millis(1300)).await;
        watchdog.stop();
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(watchdog.timeout_count() >= 1);
    }
}
