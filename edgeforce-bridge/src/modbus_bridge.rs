use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::Local;

use edgeforce_modbus::{FunctionCode, ModbusManager, ReadRequest, ScalingTriple};
use edgeforce_mqtt::MqttClient;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::types::{ModbusBridgeStatus, ModbusMqttMapping, ModbusPublishPayload};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Poll-and-publish bridge from Modbus registers to MQTT topics. Grounded
/// directly on `modbus_mqtt_bridge.py`'s `ModbusMQTTBridge`: a single poll
/// loop walking an ordered mapping list, one register read per mapping per
/// cycle, scaled and published as `{value, unit, timestamp}` with
/// `retain=true`.
pub struct ModbusMqttBridge {
    modbus: Arc<ModbusManager>,
    mqtt: Arc<MqttClient>,
    mappings: Mutex<Vec<ModbusMqttMapping>>,
    poll_interval: Mutex<Duration>,
    running: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ModbusMqttBridge {
    #[must_use]
    pub fn new(modbus: Arc<ModbusManager>, mqtt: Arc<MqttClient>) -> Arc<Self> {
        Arc::new(Self {
            modbus,
            mqtt,
            mappings: Mutex::new(Vec::new()),
            poll_interval: Mutex::new(DEFAULT_POLL_INTERVAL),
            running: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        })
    }

    pub async fn set_mappings(&self, mappings: Vec<ModbusMqttMapping>) {
        *self.mappings.lock().await = mappings;
    }

    /// Sets the poll interval, clamped to the 500ms floor per spec.md §4.6.
    pub async fn set_poll_interval(&self, interval: Duration) {
        let clamped = interval.max(MIN_POLL_INTERVAL);
        if clamped != interval {
            warn!(?interval, floor = ?MIN_POLL_INTERVAL, "poll interval below floor, clamping");
        }
        *self.poll_interval.lock().await = clamped;
    }

    /// Starts the poller. Refuses if MQTT is disabled or there are no
    /// enabled mappings, mirroring `ModbusMQTTBridge.start()`.
    pub async fn start(self: &Arc<Self>) -> Result<(), &'static str> {
        if !self.mqtt.is_enabled() {
            return Err("mqtt disabled");
        }
        let enabled_count = self
            .mappings
            .lock()
            .await
            .iter()
            .filter(|m| m.enabled)
            .count();
        if enabled_count == 0 {
            return Err("no enabled mappings");
        }

        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.poll_loop().await });
        *self.task.lock().await = Some(handle);
        info!("modbus-mqtt bridge started");
        Ok(())
    }

    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
        info!("modbus-mqtt bridge stopped");
    }

    async fn poll_loop(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            let interval = *self.poll_interval.lock().await;
            self.poll_once().await;
            tokio::time::sleep(interval).await;
        }
    }

    async fn poll_once(&self) {
        let mappings = self.mappings.lock().await.clone();
        for mapping in mappings.iter().filter(|m| m.enabled) {
            if let Err(err) = self.poll_mapping(mapping).await {
                if is_no_communication(&err) {
                    debug!(mapping = %mapping.id, "no communication, suppressed");
                } else {
                    error!(mapping = %mapping.id, %err, "modbus-mqtt poll cycle error");
                }
            }
        }
    }

    async fn poll_mapping(&self, mapping: &ModbusMqttMapping) -> Result<(), String> {
        let device = self
            .modbus
            .get_device(&mapping.device_id)
            .await
            .ok_or_else(|| "no communication: device not registered".to_string())?;
        if !device.connected {
            return Err("no communication: device not connected".to_string());
        }

        let request = ReadRequest {
            device_id: mapping.device_id.clone(),
            register: mapping.register,
            count: 1,
            function_code: mapping.function_code,
        };
        let values = self
            .modbus
            .read(request)
            .await
            .map_err(|e| format!("no communication: {e}"))?;
        let raw = values.first().ok_or("empty read result")?.value;

        let scaling = ScalingTriple {
            multiplier: mapping.multiplier,
            offset: mapping.offset,
            decimals: mapping.decimals,
        };
        let payload = ModbusPublishPayload {
            value: scaling.apply(f64::from(raw)),
            unit: mapping.unit.clone(),
            timestamp: Local::now().to_rfc3339(),
        };

        self.mqtt
            .publish_json(&mapping.topic, &payload, true)
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub async fn status(&self) -> ModbusBridgeStatus {
        ModbusBridgeStatus {
            running: self.running.load(Ordering::SeqCst),
            mqtt_connected: self.mqtt.is_connected(),
            mappings_count: self.mappings.lock().await.len(),
            poll_interval_secs: self.poll_interval.lock().await.as_secs_f64(),
        }
    }
}

fn is_no_communication(err: &str) -> bool {
    err.starts_with("no communication")
}

#[cfg(test)]
mod tests {
    use edgeforce_resilience::HealthRegistry;

    use super::*;
    use edgeforce_mqtt::MqttConfig;

    fn mapping(enabled: bool) -> ModbusMqttMapping {
        ModbusMqttMapping {
            id: "m1".to_string(),
            enabled,
            device_id: "dev1".to_string(),
            register: 100,
            function_code: FunctionCode::ReadHoldingRegisters,
            topic: "edgeforce/modbus/dev1/reg100".to_string(),
            unit: Some("C".to_string()),
            multiplier: 0.1,
            offset: 0.0,
            decimals: 1,
        }
    }

    #[tokio::test]
    async fn start_refuses_without_enabled_mappings() {
        let health = Arc::new(HealthRegistry::new());
        let modbus = ModbusManager::new(Arc::clone(&health));
        let (mqtt, _eventloop) = MqttClient::new(&MqttConfig::default());
        let bridge = ModbusMqttBridge::new(modbus, mqtt);
        bridge.set_mappings(vec![mapping(false)]).await;
        assert!(bridge.start().await.is_err());
    }

    #[tokio::test]
    async fn poll_interval_clamped_to_floor() {
        let health = Arc::new(HealthRegistry::new());
        let modbus = ModbusManager::new(Arc::clone(&health));
        let (mqtt, _eventloop) = MqttClient::new(&MqttConfig::default());
        let bridge = ModbusMqttBridge::new(modbus, mqtt);
        bridge.set_poll_interval(Duration::from_millis(100)).await;
        let status = bridge.status().await;
        assert!((status.poll_interval_secs - 0.5).abs() < f64::EPSILON);
    }
}
