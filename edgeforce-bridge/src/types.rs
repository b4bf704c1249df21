use serde::{Deserialize, Serialize};

use edgeforce_modbus::FunctionCode;

/// One row of a Modbus->MQTT bridge's mapping table: which register on
/// which device to poll and where to publish it. Grounded on
/// `modbus_mqtt_bridge.py`'s mapping dict shape (`device_id`, `register`,
/// `function_code`, `topic`, `unit`, `multiplier`/`offset`/`decimals`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusMqttMapping {
    pub id: String,
    pub enabled: bool,
    pub device_id: String,
    pub register: u16,
    pub function_code: FunctionCode,
    pub topic: String,
    pub unit: Option<String>,
    pub multiplier: f64,
    pub offset: f64,
    pub decimals: u32,
}

/// Status snapshot of the Modbus->MQTT bridge, matching
/// `modbus_mqtt_bridge.py`'s `get_status()` dict shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusBridgeStatus {
    pub running: bool,
    pub mqtt_connected: bool,
    pub mappings_count: usize,
    pub poll_interval_secs: f64,
}

/// The JSON body published for each Modbus->MQTT mapping, exactly
/// `{value, unit, timestamp}` per spec.md §4.6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusPublishPayload {
    pub value: f64,
    pub unit: Option<String>,
    /// ISO-8601, matching `datetime.now().isoformat()` in the original.
    pub timestamp: String,
}

/// Payload encoding for a CAN->MQTT mapping, mirroring the three formats
/// `can_mqtt_bridge.py`'s `_format_message` supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanPublishFormat {
    Json,
    RawHex,
    DataArray,
}

/// One row of a CAN->MQTT bridge's mapping table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanMqttMapping {
    pub id: String,
    pub enabled: bool,
    pub can_id: u32,
    pub topic: String,
    pub format: CanPublishFormat,
    pub qos: u8,
    pub publish_on_change: bool,
    pub min_interval_ms: u64,
    pub device_name: Option<String>,
}

/// Per-mapping counters and last-seen bookkeeping, matching
/// `can_mqtt_bridge.py`'s per-mapping dict (`last_publish`,
/// `message_counts`, `last_values`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CanMappingStats {
    pub messages_received: u64,
    pub messages_published: u64,
    pub messages_dropped: u64,
    pub errors: u64,
    pub last_value_hex: Option<String>,
    pub last_publish_at_unix: Option<f64>,
}

/// Global CAN->MQTT bridge stats, matching `can_mqtt_bridge.py`'s top-level
/// `stats` dict.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CanBridgeStats {
    pub messages_received: u64,
    pub messages_published: u64,
    pub messages_dropped: u64,
    pub errors: u64,
    pub start_time_unix: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanBridgeStatus {
    pub running: bool,
    pub mqtt_connected: bool,
    pub can_connected: bool,
    pub mappings_count: usize,
    pub stats: CanBridgeStats,
    pub publish_rate: f64,
    pub mapping_details: Vec<(String, CanMappingStats)>,
}

/// The `json` format's full structured payload, per spec.md §4.7(d).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanJsonPayload {
    pub can_id_hex: String,
    pub can_id_decimal: u32,
    pub dlc: u8,
    pub data_hex: Vec<String>,
    pub data_decimal: Vec<u8>,
    pub extended: bool,
    pub timestamp: String,
    pub timestamp_unix: f64,
    pub device_name: Option<String>,
}
