use serde::{Deserialize, Serialize};

/// Broker configuration, the exact shape `config.py`'s `MQTT_CONFIG` dict
/// carries (environment-variable-sourced in the original; loaded from
/// `mqtt_config.json` by `edgeforce-config` here).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub client_id: String,
    #[serde(default)]
    pub use_tls: bool,
    pub keepalive_secs: u16,
    /// Default QoS for publishes that don't specify their own (bridge
    /// payloads carry a per-mapping QoS; this is the fallback).
    pub qos: u8,
    pub enabled: bool,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: "localhost".to_string(),
            port: 1883,
            username: String::new(),
            password: String::new(),
            client_id: "efio-daemon".to_string(),
            use_tls: false,
            keepalive_secs: 60,
            qos: 1,
            enabled: true,
        }
    }
}
