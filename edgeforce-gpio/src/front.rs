use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc,
};
use std::time::Duration;

use edgeforce_iostate::IoState;
use edgeforce_resilience::{retry_forever_until_success, CircuitBreaker, HealthRegistry, HealthStatus};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::backend::{GpioBackend, GpioError, CHANNEL_COUNT};

const FAILURE_THRESHOLD: u32 = 5;
const BREAKER_FAILURE_THRESHOLD: u32 = 5;
const BREAKER_TIMEOUT: Duration = Duration::from_secs(30);
const REINIT_INITIAL_DELAY: Duration = Duration::from_secs(2);
const REINIT_MAX_DELAY: Duration = Duration::from_secs(60);

/// GPIO front-end: breaker-protected hardware access over a fixed four DI /
/// four DO layout, writing state unconditionally before attempting a
/// best-effort hardware write, and falling back to simulation with a
/// backoff-driven reinit loop after repeated failures.
///
/// Grounded on `io_manager.py`'s `IOManager` end to end.
pub struct GpioFront {
    backend: Mutex<Box<dyn GpioBackend>>,
    breaker: CircuitBreaker,
    io_state: Arc<IoState>,
    health: Arc<HealthRegistry>,
    consecutive_failures: AtomicU32,
    reinit_running: AtomicBool,
}

impl GpioFront {
    /// Builds the front-end and attempts an initial hardware bring-up
    /// unless the I/O state is already flagged for simulation. On failure
    /// it falls back to simulation and starts the background reinit loop,
    /// exactly as `IOManager.__init__` does.
    pub async fn new(
        backend: Box<dyn GpioBackend>,
        io_state: Arc<IoState>,
        health: Arc<HealthRegistry>,
    ) -> Arc<Self> {
        let front = Arc::new(Self {
            backend: Mutex::new(backend),
            breaker: CircuitBreaker::new("gpio", BREAKER_FAILURE_THRESHOLD, BREAKER_TIMEOUT),
            io_state,
            health,
            consecutive_failures: AtomicU32::new(0),
            reinit_running: AtomicBool::new(false),
        });

        if !front.io_state.get_simulation().await {
            match front.backend.lock().await.init() {
                Ok(()) => {
                    front
                        .health
                        .update("gpio", HealthStatus::Healthy, "GPIO initialized")
                        .await;
                }
                Err(err) => {
                    warn!(%err, "GPIO initial setup failed; entering simulation mode");
                    front.io_state.set_simulation(true).await;
                    front
                        .health
                        .update("gpio", HealthStatus::Degraded, "GPIO init failed, simulation mode")
                        .await;
                    Self::start_reinit(Arc::clone(&front));
                }
            }
        }

        front
    }

    /// Reads all four digital inputs. Returns the last known I/O state
    /// immediately if simulation is active (no hardware required);
    /// otherwise performs a breaker-protected hardware read and updates the
    /// shared I/O state on success.
    pub async fn read_all_inputs(self: &Arc<Self>) -> [u8; CHANNEL_COUNT] {
        if self.io_state.get_simulation().await {
            return self.io_state.get_di().await.unwrap_or([0; CHANNEL_COUNT]);
        }

        let backend = &self.backend;
        let result: Result<[u8; CHANNEL_COUNT], edgeforce_resilience::BreakerError<GpioError>> =
            self.breaker
                .call(|| async { backend.lock().await.read_inputs() })
                .await;

        match result {
            Ok(values) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                let _ = self.io_state.set_di_all(values).await;
                values
            }
            Err(err) => {
                warn!(%err, "GPIO read failed");
                self.note_failure("Consecutive read failures").await;
                self.io_state.get_di().await.unwrap_or([0; CHANNEL_COUNT])
            }
        }
    }

    /// Writes a digital output. The shared I/O state is updated first and
    /// unconditionally, matching `write_output`'s "state wins even if
    /// hardware fails" behavior; the hardware write is best-effort and its
    /// error is swallowed after bookkeeping.
    pub async fn write_output(self: &Arc<Self>, channel: usize, value: u8) {
        if let Err(err) = self.io_state.set_do(channel, value).await {
            error!(%err, channel, "invalid GPIO output write rejected by state");
            return;
        }

        if self.io_state.get_simulation().await {
            return;
        }

        let backend = &self.backend;
        let result: Result<(), edgeforce_resilience::BreakerError<GpioError>> = self
            .breaker
            .call(|| async { backend.lock().await.write_output(channel, value) })
            .await;

        if let Err(err) = result {
            warn!(%err, channel, "GPIO write failed");
            self.note_failure("Consecutive write failures").await;
        } else {
            self.consecutive_failures.store(0, Ordering::Relaxed);
        }
    }

    async fn note_failure(self: &Arc<Self>, reason: &str) {
        let count = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if count >= FAILURE_THRESHOLD {
            warn!(reason, "GPIO: too many failures, switching to simulation mode");
            self.io_state.set_simulation(true).await;
            self.health
                .update("gpio", HealthStatus::Degraded, reason)
                .await;
            Self::start_reinit(Arc::clone(self));
        }
    }

    fn start_reinit(front: Arc<Self>) {
        if front.reinit_running.swap(true, Ordering::SeqCst) {
            return;
        }
        tokio::spawn(async move {
            info!("GPIO reinit: attempting to initialize hardware...");
            retry_forever_until_success(REINIT_INITIAL_DELAY, REINIT_MAX_DELAY, || async {
                front.backend.lock().await.init()
            })
            .await;
            info!("GPIO reinit: hardware initialized successfully");
            front.io_state.set_simulation(false).await;
            front.consecutive_failures.store(0, Ordering::Relaxed);
            front
                .health
                .update("gpio", HealthStatus::Healthy, "GPIO reinitialized")
                .await;
            front.reinit_running.store(false, Ordering::SeqCst);
        });
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::simulated::SimulatedGpioBackend;

    #[tokio::test]
    async fn write_updates_state_even_in_simulation() {
        let io_state = Arc::new(IoState::new());
        io_state.set_simulation(true).await;
        let health = Arc::new(HealthRegistry::new());
        let front = GpioFront::new(Box::new(SimulatedGpioBackend::new()), io_state.clone(), health).await;

        front.write_output(2, 1).await;
        assert_eq!(io_state.get_do().await.unwrap()[2], 1);
    }

    #[tokio::test]
    async fn read_uses_state_directly_in_simulation() {
        let io_state = Arc::new(IoState::new());
        io_state.set_simulation(true).await;
        io_state.set_di_all([1, 0, 1, 0]).await.unwrap();
        let health = Arc::new(HealthRegistry::new());
        let front = GpioFront::new(Box::new(SimulatedGpioBackend::new()), io_state, health).await;

        assert_eq!(front.read_all_inputs().await, [1, 0, 1, 0]);
    }

    #[tokio::test]
    async fn hardware_init_failure_falls_back_to_simulation() {
        use crate::simulated::AlwaysFailingBackend;

        let io_state = Arc::new(IoState::new());
        let health = Arc::new(HealthRegistry::new());
        let _front = GpioFront::new(
            Box::new(AlwaysFailingBackend { init_succeeds: false }),
            io_state.clone(),
            health.clone(),
        )
        .await;

        assert!(io_state.get_simulation().await);
        let component = health.get("gpio").await.unwrap();
        assert_eq!(component.status, HealthStatus::Degraded);
    }
}
