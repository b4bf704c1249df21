use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
    time::{Duration, SystemTime},
};

use edgeforce_resilience::{
    retry_with_backoff, BreakerError, CircuitBreaker, HealthRegistry, HealthStatus, RetryPolicy,
};
use tokio::sync::{broadcast, Mutex};
use tracing::{error, info, warn};

use crate::{
    crc::crc16,
    transport::SerialTransport,
    types::{FunctionCode, ModbusDevice, PollSample, ReadRequest, RegisterValue, WriteRequest},
};

const DEVICE_BREAKER_FAILURE_THRESHOLD: u32 = 3;
const DEVICE_BREAKER_TIMEOUT: Duration = Duration::from_secs(30);
const LIVENESS_INTERVAL: Duration = Duration::from_secs(5);
const LIVENESS_FAILURES_BEFORE_CLEANUP: u32 = 3;
const CONNECT_RETRY: RetryPolicy = RetryPolicy {
    max_retries: 2,
    initial_delay: Duration::from_secs(1),
    backoff_multiplier: 2.0,
    max_delay: Duration::from_secs(10),
};

/// Classification of a transaction failure, surfaced to callers per
/// spec.md §7's `TransportError` sub-kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ModbusError {
    #[error("no response from device")]
    NoResponse,
    #[error("invalid response frame")]
    InvalidResponse,
    #[error("serial transport error")]
    SerialError,
    #[error("device not connected")]
    NotConnected,
    #[error("device not found")]
    NotFound,
}

struct Connection {
    device_id: String,
    transport: Mutex<Box<dyn SerialTransport>>,
    breaker: CircuitBreaker,
    /// One lock per serial port, shared by every device on that port, so
    /// daisy-chained RS-485 transactions never overlap.
    port_lock: Arc<Mutex<()>>,
    stop: Arc<AtomicBool>,
    liveness_failures: AtomicU32,
}

/// Modbus RTU device manager: owns per-device connections, pollers,
/// liveness checks, and breakers, grounded on the connection-management
/// idiom shared by `can_manager.py` (retry-guarded connect/disconnect,
/// breaker-wrapped transactions) applied to the Modbus read/write contract
/// spec.md §4.4 specifies directly.
pub struct ModbusManager {
    devices: Mutex<HashMap<String, ModbusDevice>>,
    connections: Mutex<HashMap<String, Arc<Connection>>>,
    port_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    health: Arc<HealthRegistry>,
    sample_tx: broadcast::Sender<PollSample>,
}

impl ModbusManager {
    #[must_use]
    pub fn new(health: Arc<HealthRegistry>) -> Arc<Self> {
        let (sample_tx, _) = broadcast::channel(1024);
        Arc::new(Self {
            devices: Mutex::new(HashMap::new()),
            connections: Mutex::new(HashMap::new()),
            port_locks: Mutex::new(HashMap::new()),
            health,
            sample_tx,
        })
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PollSample> {
        self.sample_tx.subscribe()
    }

    pub async fn register_device(&self, device: ModbusDevice) -> Result<(), String> {
        device.validate()?;
        self.devices.lock().await.insert(device.id.clone(), device);
        Ok(())
    }

    pub async fn get_device(&self, device_id: &str) -> Option<ModbusDevice> {
        self.devices.lock().await.get(device_id).cloned()
    }

    pub async fn list_devices(&self) -> Vec<ModbusDevice> {
        self.devices.lock().await.values().cloned().collect()
    }

    async fn port_lock_for(&self, port: &str) -> Arc<Mutex<()>> {
        let mut locks = self.port_locks.lock().await;
        locks
            .entry(port.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Connects to `device_id`'s configured port under retry (2 attempts,
    /// 1s initial delay), then starts its poller (if polling is enabled)
    /// and liveness checker.
    pub async fn connect(
        self: &Arc<Self>,
        device_id: &str,
        make_transport: impl Fn() -> Box<dyn SerialTransport> + Send + Sync + 'static,
    ) -> Result<(), ModbusError> {
        let device = self
            .devices
            .lock()
            .await
            .get(device_id)
            .cloned()
            .ok_or(ModbusError::NotFound)?;

        let transport = retry_with_backoff(CONNECT_RETRY, || async { Ok::<_, ()>(make_transport()) })
            .await
            .map_err(|_| ModbusError::SerialError)?;

        let port_lock = self.port_lock_for(&device.port).await;
        let connection = Arc::new(Connection {
            device_id: device_id.to_string(),
            transport: Mutex::new(transport),
            breaker: CircuitBreaker::new(
                format!("modbus-{device_id}"),
                DEVICE_BREAKER_FAILURE_THRESHOLD,
                DEVICE_BREAKER_TIMEOUT,
            ),
            port_lock,
            stop: Arc::new(AtomicBool::new(false)),
            liveness_failures: AtomicU32::new(0),
        });

        self.connections
            .lock()
            .await
            .insert(device_id.to_string(), Arc::clone(&connection));

        {
            let mut devices = self.devices.lock().await;
            if let Some(device) = devices.get_mut(device_id) {
                device.connected = true;
                device.last_connected_at = Some(now_unix());
            }
        }

        self.health
            .update(&format!("modbus-{device_id}"), HealthStatus::Healthy, "connected")
            .await;

        if device.polling.enabled {
            self.spawn_poller(Arc::clone(self), device_id.to_string());
        }
        self.spawn_liveness(Arc::clone(self), device_id.to_string());

        Ok(())
    }

    /// Stops poller/liveness, closes the connection, and (per DESIGN.md's
    /// resolution of the "cleanup resets breaker" open question) preserves
    /// the breaker's state rather than clearing it.
    pub async fn disconnect(&self, device_id: &str) {
        self.cleanup_connection(device_id, "manual disconnect").await;
    }

    async fn cleanup_connection(&self, device_id: &str, reason: &str) {
        if let Some(connection) = self.connections.lock().await.remove(device_id) {
            connection.stop.store(true, Ordering::SeqCst);
        }
        if let Some(device) = self.devices.lock().await.get_mut(device_id) {
            device.connected = false;
            device.polling_active = false;
            device.last_connected_at = None;
        }
        self.health
            .update(&format!("modbus-{device_id}"), HealthStatus::Degraded, reason)
            .await;
        warn!(device_id, reason, "modbus hardware_disconnected");
    }

    fn spawn_poller(self: &Arc<Self>, manager: Arc<Self>, device_id: String) {
        tokio::spawn(async move {
            loop {
                let (interval, registers, stop) = {
                    let devices = manager.devices.lock().await;
                    let Some(device) = devices.get(&device_id) else {
                        return;
                    };
                    let connections = manager.connections.lock().await;
                    let Some(connection) = connections.get(&device_id) else {
                        return;
                    };
                    (
                        Duration::from_millis(device.polling.interval_ms),
                        device.registers.iter().filter(|r| r.poll).cloned().collect::<Vec<_>>(),
                        Arc::clone(&connection.stop),
                    )
                };

                if stop.load(Ordering::SeqCst) {
                    return;
                }

                for register in &registers {
                    match manager
                        .read(ReadRequest {
                            device_id: device_id.clone(),
                            register: register.address,
                            count: 1,
                            function_code: register.function_code,
                        })
                        .await
                    {
                        Ok(values) => {
                            if let Some(value) = values.first() {
                                let _ = manager.sample_tx.send(PollSample {
                                    device_id: device_id.clone(),
                                    register: register.clone(),
                                    raw_value: value.value,
                                    observed_at: SystemTime::now(),
                                });
                            }
                        }
                        Err(err) => {
                            // A per-register failure doesn't abort the rest of the cycle.
                            warn!(device_id, register = register.address, %err, "poll read failed");
                        }
                    }
                }

                tokio::time::sleep(interval).await;
            }
        });
    }

    fn spawn_liveness(self: &Arc<Self>, manager: Arc<Self>, device_id: String) {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(LIVENESS_INTERVAL).await;

                let stop = {
                    let connections = manager.connections.lock().await;
                    match connections.get(&device_id) {
                        Some(connection) => Arc::clone(&connection.stop),
                        None => return,
                    }
                };
                if stop.load(Ordering::SeqCst) {
                    return;
                }

                let probe = manager
                    .read(ReadRequest {
                        device_id: device_id.clone(),
                        register: 0,
                        count: 1,
                        function_code: FunctionCode::ReadHoldingRegisters,
                    })
                    .await;

                let connections = manager.connections.lock().await;
                let Some(connection) = connections.get(&device_id) else {
                    return;
                };
                match probe {
                    Ok(_) => connection.liveness_failures.store(0, Ordering::SeqCst),
                    Err(_) => {
                        let failures = connection.liveness_failures.fetch_add(1, Ordering::SeqCst) + 1;
                        if failures >= LIVENESS_FAILURES_BEFORE_CLEANUP {
                            drop(connections);
                            manager
                                .cleanup_connection(&device_id, "liveness check failed 3x")
                                .await;
                            return;
                        }
                    }
                }
            }
        });
    }

    /// Reads `count` values starting at `register`, serialized against
    /// every other transaction on the same serial port.
    pub async fn read(
        &self,
        request: ReadRequest,
    ) -> Result<Vec<RegisterValue>, ModbusError> {
        let device = self
            .devices
            .lock()
            .await
            .get(&request.device_id)
            .cloned()
            .ok_or(ModbusError::NotFound)?;
        let connection = self
            .connections
            .lock()
            .await
            .get(&request.device_id)
            .cloned()
            .ok_or(ModbusError::NotConnected)?;

        let _port_guard = connection.port_lock.lock().await;

        let frame = build_read_frame(device.slave_id, request.function_code, request.register, request.count);
        let transport = &connection.transport;
        let result = connection
            .breaker
            .call(|| async { transport.lock().await.transact(&frame) })
            .await;

        match result {
            Ok(response) => {
                self.health
                    .update(&format!("modbus-{}", request.device_id), HealthStatus::Healthy, "ok")
                    .await;
                parse_read_response(&response, request.count)
            }
            Err(BreakerError::Open { .. }) => Err(ModbusError::NotConnected),
            Err(BreakerError::Inner(_)) => {
                self.health
                    .update(
                        &format!("modbus-{}", request.device_id),
                        HealthStatus::Degraded,
                        "transaction failed",
                    )
                    .await;
                Err(ModbusError::NoResponse)
            }
        }
    }

    pub async fn write(&self, request: WriteRequest) -> Result<(), ModbusError> {
        if !matches!(
            request.function_code,
            FunctionCode::WriteSingleCoil | FunctionCode::WriteSingleRegister
        ) {
            return Err(ModbusError::InvalidResponse);
        }

        let device = self
            .devices
            .lock()
            .await
            .get(&request.device_id)
            .cloned()
            .ok_or(ModbusError::NotFound)?;
        let connection = self
            .connections
            .lock()
            .await
            .get(&request.device_id)
            .cloned()
            .ok_or(ModbusError::NotConnected)?;

        let _port_guard = connection.port_lock.lock().await;

        let frame = build_write_frame(device.slave_id, request.function_code, request.register, request.value);
        let transport = &connection.transport;
        let result = connection
            .breaker
            .call(|| async { transport.lock().await.transact(&frame) })
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(_) => Err(ModbusError::NoResponse),
        }
    }

    /// Sequentially probes every slave id in `start..=end` on `port` with
    /// a single FC3 register-0 read, returning the ids that answered.
    pub async fn auto_scan(
        &self,
        port: &str,
        start: u8,
        end: u8,
        make_transport: impl Fn() -> Box<dyn SerialTransport>,
    ) -> Vec<u8> {
        let mut responders = Vec::new();
        let mut transport = make_transport();
        for slave_id in start..=end {
            let frame = build_read_frame(slave_id, FunctionCode::ReadHoldingRegisters, 0, 1);
            if transport.transact(&frame).is_ok() {
                responders.push(slave_id);
            }
        }
        info!(port, count = responders.len(), "modbus auto-scan complete");
        responders
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn build_read_frame(slave_id: u8, function_code: FunctionCode, register: u16, count: u16) -> Vec<u8> {
    let mut frame = vec![slave_id, function_code as u8];
    frame.extend_from_slice(&register.to_be_bytes());
    frame.extend_from_slice(&count.to_be_bytes());
    append_crc(frame)
}

fn build_write_frame(slave_id: u8, function_code: FunctionCode, register: u16, value: u16) -> Vec<u8> {
    let mut frame = vec![slave_id, function_code as u8];
    frame.extend_from_slice(&register.to_be_bytes());
    frame.extend_from_slice(&value.to_be_bytes());
    append_crc(frame)
}

fn append_crc(mut frame: Vec<u8>) -> Vec<u8> {
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

fn parse_read_response(response: &[u8], count: u16) -> Result<Vec<RegisterValue>, ModbusError> {
    if response.len() < 3 {
        return Err(ModbusError::InvalidResponse);
    }
    let byte_count = response[2] as usize;
    if response.len() < 3 + byte_count || byte_count != (count as usize) * 2 {
        return Err(ModbusError::InvalidResponse);
    }
    let mut values = Vec::with_capacity(count as usize);
    for i in 0..count {
        let offset = 3 + (i as usize) * 2;
        let value = u16::from_be_bytes([response[offset], response[offset + 1]]);
        values.push(RegisterValue { register: i, value });
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::transport::SimulatedSerialTransport;
    use crate::types::{Parity, PollingConfig};

    fn sample_device() -> ModbusDevice {
        ModbusDevice {
            id: "dev1".into(),
            name: "Test Device".into(),
            description: String::new(),
            port: "ttyS2".into(),
            slave_id: 1,
            baudrate: 9600,
            parity: Parity::None,
            stopbits: 1,
            registers: vec![],
            polling: PollingConfig { enabled: false, interval_ms: 1000 },
            connected: false,
            polling_active: false,
            last_connected_at: None,
        }
    }

    #[tokio::test]
    async fn connect_then_read_happy_path() {
        let health = Arc::new(HealthRegistry::new());
        let manager = ModbusManager::new(health);
        manager.register_device(sample_device()).await.unwrap();

        manager
            .connect("dev1", || {
                Box::new(
                    SimulatedSerialTransport::new()
                        .with_register(0, 123)
                        .with_register(1, 456),
                )
            })
            .await
            .unwrap();

        let values = manager
            .read(ReadRequest {
                device_id: "dev1".into(),
                register: 0,
                count: 2,
                function_code: FunctionCode::ReadHoldingRegisters,
            })
            .await
            .unwrap();

        assert_eq!(values[0].value, 123);
        assert_eq!(values[1].value, 456);
    }

    #[tokio::test]
    async fn read_without_connection_fails() {
        let health = Arc::new(HealthRegistry::new());
        let manager = ModbusManager::new(health);
        manager.register_device(sample_device()).await.unwrap();

        let err = manager
            .read(ReadRequest {
                device_id: "dev1".into(),
                register: 0,
                count: 1,
                function_code: FunctionCode::ReadHoldingRegisters,
            })
            .await
            .unwrap_err();
        assert_eq!(err, ModbusError::NotConnected);
    }

    #[tokio::test]
    async fn rejects_read_function_code_on_write() {
        let health = Arc::new(HealthRegistry::new());
        let manager = ModbusManager::new(health);
        manager.register_device(sample_device()).await.unwrap();
        manager
            .connect("dev1", || Box::new(SimulatedSerialTransport::new()))
            .await
            .unwrap();

        let err = manager
            .write(WriteRequest {
                device_id: "dev1".into(),
                register: 0,
                value: 1,
                function_code: FunctionCode::ReadHoldingRegisters,
            })
            .await
            .unwrap_err();
        assert_eq!(err, ModbusError::InvalidResponse);
    }
}
