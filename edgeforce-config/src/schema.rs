use edgeforce_can::{AcceptFilter, CanDevice};
use serde::{Deserialize, Serialize};

/// Controller-level settings from `can_config.json`'s `controller` object:
/// crystal frequency and target bitrate, handed to
/// `edgeforce_can::CanManager::connect` at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanControllerConfig {
    pub crystal_mhz: u8,
    pub bitrate: u32,
    pub spi_speed_hz: u32,
}

impl Default for CanControllerConfig {
    fn default() -> Self {
        Self {
            crystal_mhz: 16,
            bitrate: 500_000,
            spi_speed_hz: 1_000_000,
        }
    }
}

/// `can_config.json`'s full document shape: `{controller, devices, filters,
/// auto_connect}` per spec.md §6.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CanConfigFile {
    pub controller: CanControllerConfig,
    pub devices: Vec<CanDevice>,
    pub filters: Vec<AcceptFilter>,
    pub auto_connect: bool,
}

/// `modbus_mqtt_bridge.json`'s document shape: `{enabled, poll_interval,
/// mappings}` per spec.md §6.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModbusBridgeConfigFile {
    pub enabled: bool,
    pub poll_interval_secs: f64,
    pub mappings: Vec<edgeforce_bridge::ModbusMqttMapping>,
}

/// `can_mqtt_bridge.json`'s document shape: `{enabled, mappings}` per
/// spec.md §6.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CanBridgeConfigFile {
    pub enabled: bool,
    pub mappings: Vec<edgeforce_bridge::CanMqttMapping>,
}
