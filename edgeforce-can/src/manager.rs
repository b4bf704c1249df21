use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant, SystemTime},
};

use edgeforce_resilience::{
    retry_with_backoff, BoundedLog, BreakerError, CircuitBreaker, HealthRegistry, HealthStatus,
    RetryPolicy,
};
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::{
    bitrate::Crystal,
    mcp2515::Mcp2515,
    spi::SpiBackend,
    types::{
        BitrateDetection, CanDevice, CanFrame, CanManagerStats, CanManagerStatus, Direction,
        NodeScanEntry,
    },
};

const HW_BREAKER_FAILURE_THRESHOLD: u32 = 5;
const HW_BREAKER_TIMEOUT: Duration = Duration::from_secs(30);
const DEVICE_BREAKER_FAILURE_THRESHOLD: u32 = 3;
const DEVICE_BREAKER_TIMEOUT: Duration = Duration::from_secs(60);
const LIVENESS_INTERVAL: Duration = Duration::from_secs(5);
const RX_MAX_CONSECUTIVE_ERRORS: u32 = 10;
const RX_POLL_IDLE: Duration = Duration::from_micros(1000);
const RX_DISCONNECTED_POLL: Duration = Duration::from_millis(100);
const MESSAGE_LOG_CAPACITY: usize = 1000;

const CONNECT_RETRY: RetryPolicy = RetryPolicy {
    max_retries: 3,
    initial_delay: Duration::from_secs(1),
    backoff_multiplier: 2.0,
    max_delay: Duration::from_secs(10),
};

/// Errors a [`CanManager`] call can fail with.
#[derive(Debug, thiserror::Error)]
pub enum CanError {
    #[error("CAN controller not connected")]
    NotConnected,
    #[error("device not found")]
    NotFound,
    #[error("CAN data must be <= 8 bytes")]
    PayloadTooLarge,
    #[error("hardware initialization failed")]
    InitFailed,
    #[error("hardware circuit breaker is open")]
    BreakerOpen,
    #[error("invalid device configuration: {0}")]
    InvalidDevice(String),
}

struct Controller {
    mcp: Arc<Mutex<Mcp2515>>,
    bitrate: u32,
}

impl Clone for Controller {
    fn clone(&self) -> Self {
        Self { mcp: Arc::clone(&self.mcp), bitrate: self.bitrate }
    }
}

/// CAN controller manager: owns the MCP2515 connection, a single RX fan-out
/// loop, per-device liveness tracking, and hardware/device circuit
/// breakers. Grounded directly on `can_manager.py`'s `CANManager`.
pub struct CanManager {
    crystal: Crystal,
    controller: Mutex<Option<Controller>>,
    running: Arc<AtomicBool>,
    devices: Mutex<HashMap<String, CanDevice>>,
    device_runtime: Mutex<HashMap<String, crate::types::DeviceRuntime>>,
    device_breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    hw_breaker: Arc<CircuitBreaker>,
    message_log: BoundedLog<CanFrame>,
    rx_tx: broadcast::Sender<CanFrame>,
    health: Arc<HealthRegistry>,
    stats_rx_total: AtomicU64,
    stats_tx_total: AtomicU64,
    stats_errors: AtomicU64,
    stats_overruns: AtomicU64,
    stats_hardware_failures: AtomicU64,
    stats_device_timeouts: AtomicU64,
    stats_auto_cleanups: AtomicU64,
    start_time: Mutex<Option<Instant>>,
    start_time_wall: Mutex<Option<SystemTime>>,
}

impl CanManager {
    #[must_use]
    pub fn new(crystal: Crystal, health: Arc<HealthRegistry>) -> Arc<Self> {
        let (rx_tx, _) = broadcast::channel(1024);
        Arc::new(Self {
            crystal,
            controller: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
            devices: Mutex::new(HashMap::new()),
            device_runtime: Mutex::new(HashMap::new()),
            device_breakers: Mutex::new(HashMap::new()),
            hw_breaker: Arc::new(CircuitBreaker::new(
                "CAN-Hardware",
                HW_BREAKER_FAILURE_THRESHOLD,
                HW_BREAKER_TIMEOUT,
            )),
            message_log: BoundedLog::new(MESSAGE_LOG_CAPACITY),
            rx_tx,
            health,
            stats_rx_total: AtomicU64::new(0),
            stats_tx_total: AtomicU64::new(0),
            stats_errors: AtomicU64::new(0),
            stats_overruns: AtomicU64::new(0),
            stats_hardware_failures: AtomicU64::new(0),
            stats_device_timeouts: AtomicU64::new(0),
            stats_auto_cleanups: AtomicU64::new(0),
            start_time: Mutex::new(None),
            start_time_wall: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CanFrame> {
        self.rx_tx.subscribe()
    }

    pub async fn add_device(&self, device: CanDevice) -> Result<(), CanError> {
        device.validate().map_err(CanError::InvalidDevice)?;
        info!(device = %device.name, can_id = format_args!("0x{:X}", device.can_id), "can device registered");
        let filter = device.accept_filter;
        self.devices.lock().await.insert(device.id.clone(), device);
        if let Some(filter) = filter {
            self.program_filter(filter).await;
        }
        Ok(())
    }

    /// Programs `filter` into the controller's acceptance filter bank, if a
    /// controller is currently connected. Called whenever a device carrying
    /// an `accept_filter` is registered or a connection is (re)established,
    /// per DESIGN.md's "real filter programming" Open-Question decision.
    /// A failure is logged and otherwise ignored: an un-programmed filter
    /// just means the device falls back to receiving everything, which is
    /// the same behavior as no filter configured at all.
    async fn program_filter(&self, filter: crate::types::AcceptFilter) {
        let Some(controller) = self.handle().await else {
            return;
        };
        let result = self
            .hw_breaker
            .call(|| async {
                controller
                    .mcp
                    .lock()
                    .await
                    .program_filter(filter.id, filter.mask, filter.extended)
            })
            .await;
        if let Err(err) = result {
            warn!(?err, "failed to program CAN acceptance filter");
        }
    }

    pub async fn remove_device(&self, device_id: &str) -> bool {
        let removed = self.devices.lock().await.remove(device_id).is_some();
        if removed {
            self.device_breakers.lock().await.remove(device_id);
            self.device_runtime.lock().await.remove(device_id);
        }
        removed
    }

    pub async fn get_device(&self, device_id: &str) -> Option<CanDevice> {
        self.devices.lock().await.get(device_id).cloned()
    }

    /// Every registered device, each paired with its current liveness.
    pub async fn list_devices(&self) -> Vec<(CanDevice, bool)> {
        let devices = self.devices.lock().await;
        let runtime = self.device_runtime.lock().await;
        devices
            .values()
            .map(|device| {
                let alive = runtime
                    .get(&device.id)
                    .is_some_and(|r| r.is_alive(device.timeout_threshold_secs));
                (device.clone(), alive)
            })
            .collect()
    }

    /// Connects to the MCP2515 controller under retry (3 attempts, 1s
    /// initial delay), then starts the single RX loop and liveness loop.
    pub async fn connect(
        self: &Arc<Self>,
        bitrate: u32,
        make_spi: impl Fn() -> Box<dyn SpiBackend> + Send + Sync + 'static,
    ) -> Result<u32, CanError> {
        if self.controller.lock().await.is_some() {
            return Ok(bitrate);
        }

        let crystal = self.crystal;
        let hw_breaker = Arc::clone(&self.hw_breaker);
        let (mcp, resolved) = retry_with_backoff(CONNECT_RETRY, || {
            let make_spi = &make_spi;
            let hw_breaker = Arc::clone(&hw_breaker);
            async move {
                hw_breaker
                    .call(|| async {
                        let mut mcp = Mcp2515::new(make_spi(), crystal);
                        let resolved = mcp.init(bitrate).map_err(|_| CanError::InitFailed)?;
                        Ok::<_, CanError>((mcp, resolved))
                    })
                    .await
                    .map_err(|err| match err {
                        BreakerError::Open { .. } => CanError::BreakerOpen,
                        BreakerError::Inner(inner) => inner,
                    })
            }
        })
        .await
        .map_err(|_| {
            self.stats_hardware_failures.fetch_add(1, Ordering::Relaxed);
            CanError::InitFailed
        })?;

        *self.controller.lock().await =
            Some(Controller { mcp: Arc::new(Mutex::new(mcp)), bitrate: resolved });

        *self.start_time.lock().await = Some(Instant::now());
        *self.start_time_wall.lock().await = Some(SystemTime::now());
        self.running.store(true, Ordering::SeqCst);

        self.health.update("can", HealthStatus::Healthy, format!("connected at {resolved} bps")).await;

        let filters: Vec<_> = self
            .devices
            .lock()
            .await
            .values()
            .filter_map(|device| device.accept_filter)
            .collect();
        for filter in filters {
            self.program_filter(filter).await;
        }

        self.spawn_rx_loop(Arc::clone(self));
        self.spawn_liveness_loop(Arc::clone(self));

        Ok(resolved)
    }

    /// Clones out the current controller handle under a short-lived lock,
    /// so callers never hold `self.controller`'s mutex across an `.await`
    /// that might re-enter it (e.g. a breaker call triggering cleanup).
    async fn handle(&self) -> Option<Controller> {
        self.controller.lock().await.clone()
    }

    pub async fn disconnect(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(controller) = self.controller.lock().await.take() {
            let _ = controller.mcp.lock().await.close();
        }
        self.health.update("can", HealthStatus::Degraded, "disconnected").await;
    }

    async fn cleanup_on_hardware_failure(&self, reason: &str) {
        warn!(reason, "can hardware cleanup triggered");
        for runtime in self.device_runtime.lock().await.values_mut() {
            runtime.last_rx_time = None;
        }
        self.disconnect().await;
        self.stats_auto_cleanups.fetch_add(1, Ordering::Relaxed);
        self.health.update("can", HealthStatus::Unhealthy, format!("hardware disconnected: {reason}")).await;
    }

    async fn check_hardware_health(&self) -> bool {
        let Some(controller) = self.handle().await else {
            return false;
        };
        let result = self.hw_breaker.call(|| async { controller.mcp.lock().await.health_probe() }).await;
        match result {
            Ok(_) => true,
            Err(_) => {
                self.stats_hardware_failures.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    fn spawn_rx_loop(self: &Arc<Self>, manager: Arc<Self>) {
        tokio::spawn(async move {
            let mut consecutive_errors = 0u32;
            loop {
                if !manager.running.load(Ordering::SeqCst) {
                    return;
                }

                let Some(controller) = manager.handle().await else {
                    tokio::time::sleep(RX_DISCONNECTED_POLL).await;
                    continue;
                };

                let read = manager
                    .hw_breaker
                    .call(|| async {
                        let mut mcp = controller.mcp.lock().await;
                        if mcp.available().map_err(|_| ())? {
                            Ok(Some(mcp.read_message().map_err(|_| ())?))
                        } else {
                            Ok(None)
                        }
                    })
                    .await;

                match read {
                    Ok(Some(frame)) => {
                        consecutive_errors = 0;
                        manager.handle_rx_message(frame.can_id, frame.data, frame.extended).await;
                    }
                    Ok(None) => tokio::time::sleep(RX_POLL_IDLE).await,
                    Err(_) => {
                        consecutive_errors += 1;
                        manager.stats_errors.fetch_add(1, Ordering::Relaxed);
                        if consecutive_errors >= RX_MAX_CONSECUTIVE_ERRORS {
                            manager
                                .cleanup_on_hardware_failure(&format!("RX errors: {consecutive_errors}"))
                                .await;
                            return;
                        }
                        tokio::time::sleep(RX_DISCONNECTED_POLL).await;
                    }
                }
            }
        });
    }

    async fn handle_rx_message(&self, can_id: u32, data: Vec<u8>, extended: bool) {
        self.stats_rx_total.fetch_add(1, Ordering::Relaxed);

        let frame = CanFrame {
            can_id,
            dlc: data.len() as u8,
            data,
            extended,
            rtr: false,
            direction: Direction::Rx,
            timestamp: SystemTime::now(),
        };

        self.message_log.push(frame.clone()).await;

        {
            let mut devices = self.devices.lock().await;
            let mut runtime = self.device_runtime.lock().await;
            for device in devices.values_mut() {
                if device.can_id == can_id && device.enabled {
                    device.rx_count += 1;
                    let entry = runtime.entry(device.id.clone()).or_default();
                    entry.last_rx_time = Some(Instant::now());
                    if let Some(breaker) = self.device_breakers.lock().await.get(&device.id) {
                        breaker.on_success().await;
                    }
                }
            }
        }

        if self.rx_tx.send(frame).is_err() {
            // No subscribers currently listening; not an overrun, just a no-op.
        }
    }

    fn spawn_liveness_loop(self: &Arc<Self>, manager: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(LIVENESS_INTERVAL).await;
                if !manager.running.load(Ordering::SeqCst) {
                    return;
                }

                if !manager.check_hardware_health().await {
                    manager.cleanup_on_hardware_failure("hardware unresponsive").await;
                    return;
                }

                let device_ids: Vec<(String, u32)> = manager
                    .devices
                    .lock()
                    .await
                    .values()
                    .filter(|d| d.enabled)
                    .map(|d| (d.id.clone(), d.timeout_threshold_secs))
                    .collect();

                for (device_id, threshold) in device_ids {
                    manager.check_device_timeout(&device_id, threshold).await;
                }
            }
        });
    }

    /// Single-count timeout handling mirroring `_handle_device_timeout`:
    /// the `device_timeouts` counter increments once per transition into
    /// timeout, not once per liveness sweep while it remains timed out.
    async fn check_device_timeout(&self, device_id: &str, threshold_secs: u32) {
        let mut runtime = self.device_runtime.lock().await;
        let Some(entry) = runtime.get_mut(device_id) else {
            return;
        };
        let Some(last_rx) = entry.last_rx_time else {
            return;
        };

        if last_rx.elapsed().as_secs_f64() > f64::from(threshold_secs) {
            if !entry.timeout_logged {
                entry.timeout_logged = true;
                self.stats_device_timeouts.fetch_add(1, Ordering::Relaxed);
                drop(runtime);

                let breaker = {
                    let mut breakers = self.device_breakers.lock().await;
                    Arc::clone(breakers.entry(device_id.to_string()).or_insert_with(|| {
                        Arc::new(CircuitBreaker::new(
                            format!("CAN-{device_id}"),
                            DEVICE_BREAKER_FAILURE_THRESHOLD,
                            DEVICE_BREAKER_TIMEOUT,
                        ))
                    }))
                };
                breaker.on_failure().await;
                self.health.update(&format!("can-{device_id}"), HealthStatus::Degraded, "device timeout").await;
            } else {
                drop(runtime);
                if let Some(breakers) = self.device_breakers.lock().await.get(device_id) {
                    breakers.on_failure().await;
                }
            }
        } else if entry.timeout_logged {
            entry.timeout_logged = false;
            info!(device_id, "can device recovered");
        }
    }

    /// Sends a frame, wrapped in the hardware breaker; a failure triggers
    /// the same cleanup path a repeated RX failure does.
    pub async fn send(&self, can_id: u32, data: Vec<u8>, extended: bool) -> Result<(), CanError> {
        if data.len() > 8 {
            return Err(CanError::PayloadTooLarge);
        }
        let Some(controller) = self.handle().await else {
            return Err(CanError::NotConnected);
        };

        let result = self
            .hw_breaker
            .call(|| async { controller.mcp.lock().await.send_message(can_id, &data, extended) })
            .await;

        match result {
            Ok(()) => {
                self.stats_tx_total.fetch_add(1, Ordering::Relaxed);
                self.message_log
                    .push(CanFrame {
                        can_id,
                        dlc: data.len() as u8,
                        data,
                        extended,
                        rtr: false,
                        direction: Direction::Tx,
                        timestamp: SystemTime::now(),
                    })
                    .await;

                let mut devices = self.devices.lock().await;
                for device in devices.values_mut() {
                    if device.can_id == can_id {
                        device.tx_count += 1;
                    }
                }
                Ok(())
            }
            Err(BreakerError::Open { .. }) => Err(CanError::BreakerOpen),
            Err(BreakerError::Inner(_)) => {
                self.stats_errors.fetch_add(1, Ordering::Relaxed);
                if !self.check_hardware_health().await {
                    self.cleanup_on_hardware_failure("TX error").await;
                }
                Err(CanError::InitFailed)
            }
        }
    }

    /// For each candidate bitrate: connect, clear the message log, observe
    /// for 5s, score `observed_messages - 5*observed_errors`. Returns the
    /// best-scoring candidate with >=10 messages and score>5, or
    /// `detected: false` if nothing qualifies, per spec.md §4.5. Leaves the
    /// controller disconnected either way.
    pub async fn detect_bitrate(
        self: &Arc<Self>,
        make_spi: impl Fn() -> Box<dyn SpiBackend> + Send + Sync + Clone + 'static,
    ) -> BitrateDetection {
        let candidates = crate::bitrate::candidates(self.crystal);
        let mut best: Option<(u32, u64, u64, i64)> = None;

        for candidate in candidates {
            self.message_log.clear().await;
            let before_rx = self.stats_rx_total.load(Ordering::Relaxed);
            let before_err = self.stats_errors.load(Ordering::Relaxed);

            if self.connect(candidate, make_spi.clone()).await.is_err() {
                continue;
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
            self.disconnect().await;

            let messages = self.stats_rx_total.load(Ordering::Relaxed) - before_rx;
            let errors = self.stats_errors.load(Ordering::Relaxed) - before_err;
            let score = messages as i64 - 5 * errors as i64;

            if messages >= 10 && score > 5 {
                let better = best.is_none_or(|(_, _, _, best_score)| score > best_score);
                if better {
                    best = Some((candidate, messages, errors, score));
                }
            }
        }

        match best {
            Some((bitrate, messages, errors, score)) => BitrateDetection {
                detected: true,
                bitrate: Some(bitrate),
                messages_observed: messages,
                errors_observed: errors,
                score,
            },
            None => BitrateDetection {
                detected: false,
                bitrate: None,
                messages_observed: 0,
                errors_observed: 0,
                score: 0,
            },
        }
    }

    /// Groups every frame currently in the message log by CAN ID, sorted by
    /// message count descending, for bus-discovery tooling.
    pub async fn node_scan(&self) -> Vec<NodeScanEntry> {
        let mut buckets: HashMap<u32, NodeScanEntry> = HashMap::new();
        for frame in self.message_log.snapshot().await {
            let entry = buckets.entry(frame.can_id).or_insert(NodeScanEntry {
                can_id: frame.can_id,
                count: 0,
                last_seen: frame.timestamp,
            });
            entry.count += 1;
            entry.last_seen = frame.timestamp;
        }
        let mut entries: Vec<_> = buckets.into_values().collect();
        entries.sort_by(|a, b| b.count.cmp(&a.count));
        entries
    }

    pub async fn recent_messages(&self, count: usize) -> Vec<CanFrame> {
        self.message_log.recent(count).await
    }

    pub async fn status(&self) -> CanManagerStatus {
        let controller = self.controller.lock().await;
        let connected = controller.is_some();
        let bitrate = controller.as_ref().map_or(0, |c| c.bitrate);
        drop(controller);

        let devices = self.devices.lock().await;
        let runtime = self.device_runtime.lock().await;
        let alive_devices = devices
            .values()
            .filter(|d| runtime.get(&d.id).is_some_and(|r| r.is_alive(d.timeout_threshold_secs)))
            .count();
        let devices_count = devices.len();
        drop(devices);
        drop(runtime);

        let uptime_secs = self.start_time.lock().await.map(|t| t.elapsed().as_secs_f64());

        CanManagerStatus {
            connected,
            bitrate,
            devices_count,
            alive_devices,
            stats: self.stats().await,
            uptime_secs,
        }
    }

    async fn stats(&self) -> CanManagerStats {
        CanManagerStats {
            rx_total: self.stats_rx_total.load(Ordering::Relaxed),
            tx_total: self.stats_tx_total.load(Ordering::Relaxed),
            errors: self.stats_errors.load(Ordering::Relaxed),
            overruns: self.stats_overruns.load(Ordering::Relaxed),
            hardware_failures: self.stats_hardware_failures.load(Ordering::Relaxed),
            device_timeouts: self.stats_device_timeouts.load(Ordering::Relaxed),
            auto_cleanups: self.stats_auto_cleanups.load(Ordering::Relaxed),
            start_time: *self.start_time_wall.lock().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::spi::SimulatedSpiBackend;

    #[tokio::test]
    async fn connect_then_send_updates_tx_stats() {
        let health = Arc::new(HealthRegistry::new());
        let manager = CanManager::new(Crystal::Mhz16, health);
        manager.connect(125_000, || Box::new(SimulatedSpiBackend::new())).await.unwrap();

        manager.send(0x123, vec![1, 2, 3], false).await.unwrap();
        let stats = manager.status().await.stats;
        assert_eq!(stats.tx_total, 1);
    }

    #[tokio::test]
    async fn send_without_connection_fails() {
        let health = Arc::new(HealthRegistry::new());
        let manager = CanManager::new(Crystal::Mhz16, health);
        let err = manager.send(0x123, vec![1], false).await.unwrap_err();
        assert!(matches!(err, CanError::NotConnected));
    }

    #[tokio::test]
    async fn rx_message_updates_device_liveness() {
        let health = Arc::new(HealthRegistry::new());
        let manager = CanManager::new(Crystal::Mhz16, health);
        manager
            .add_device(CanDevice {
                id: "d1".into(),
                name: "ecu".into(),
                can_id: 0x321,
                extended: false,
                enabled: true,
                timeout_threshold_secs: 30,
                accept_filter: None,
                rx_count: 0,
                tx_count: 0,
            })
            .await
            .unwrap();

        manager.handle_rx_message(0x321, vec![1, 2], false).await;

        let devices = manager.list_devices().await;
        let (device, alive) = devices.into_iter().find(|(d, _)| d.id == "d1").unwrap();
        assert_eq!(device.rx_count, 1);
        assert!(alive);
    }

    #[tokio::test]
    async fn node_scan_groups_and_sorts_by_count() {
        let health = Arc::new(HealthRegistry::new());
        let manager = CanManager::new(Crystal::Mhz16, health);
        manager.handle_rx_message(0x111, vec![1], false).await;
        manager.handle_rx_message(0x222, vec![1], false).await;
        manager.handle_rx_message(0x222, vec![1], false).await;

        let scan = manager.node_scan().await;
        assert_eq!(scan[0].can_id, 0x222);
        assert_eq!(scan[0].count, 2);
        assert_eq!(scan[1].can_id, 0x111);
    }

    #[tokio::test]
    async fn oversized_payload_rejected_before_touching_hardware() {
        let health = Arc::new(HealthRegistry::new());
        let manager = CanManager::new(Crystal::Mhz16, health);
        manager.connect(125_000, || Box::new(SimulatedSpiBackend::new())).await.unwrap();
        let err = manager.send(0x1, vec![0; 9], false).await.unwrap_err();
        assert!(matches!(err, CanError::PayloadTooLarge));
    }

    fn device_with_filter(id: &str, can_id: u32, filter: Option<crate::types::AcceptFilter>) -> CanDevice {
        CanDevice {
            id: id.into(),
            name: id.into(),
            can_id,
            extended: false,
            enabled: true,
            timeout_threshold_secs: 30,
            accept_filter: filter,
            rx_count: 0,
            tx_count: 0,
        }
    }

    #[tokio::test]
    async fn connect_programs_filters_for_preregistered_devices() {
        let health = Arc::new(HealthRegistry::new());
        let manager = CanManager::new(Crystal::Mhz16, health);
        manager
            .add_device(device_with_filter(
                "d1",
                0x321,
                Some(crate::types::AcceptFilter { id: 0x321, mask: 0x7FF, extended: false }),
            ))
            .await
            .unwrap();

        // Filter programming runs as part of connect(); a filtered device's
        // messages still arrive once registered (the simulated backend does
        // not actually narrow RX, so this also confirms the filter write
        // didn't leave the chip wedged in config mode).
        manager.connect(125_000, || Box::new(SimulatedSpiBackend::new())).await.unwrap();
        manager.handle_rx_message(0x321, vec![1], false).await;

        let devices = manager.list_devices().await;
        let (device, alive) = devices.into_iter().find(|(d, _)| d.id == "d1").unwrap();
        assert_eq!(device.rx_count, 1);
        assert!(alive);
    }

    #[tokio::test]
    async fn add_device_after_connect_programs_filter_without_erroring() {
        let health = Arc::new(HealthRegistry::new());
        let manager = CanManager::new(Crystal::Mhz16, health);
        manager.connect(125_000, || Box::new(SimulatedSpiBackend::new())).await.unwrap();

        manager
            .add_device(device_with_filter(
                "d2",
                0x456,
                Some(crate::types::AcceptFilter { id: 0x456, mask: 0x7FF, extended: false }),
            ))
            .await
            .unwrap();

        manager.handle_rx_message(0x456, vec![9], false).await;
        let devices = manager.list_devices().await;
        let (device, _) = devices.into_iter().find(|(d, _)| d.id == "d2").unwrap();
        assert_eq!(device.rx_count, 1);
    }
}
