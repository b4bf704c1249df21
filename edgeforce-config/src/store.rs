use std::path::PathBuf;

use edgeforce_modbus::ModbusDevice;
use edgeforce_mqtt::MqttConfig;
use serde::{de::DeserializeOwned, Serialize};
use tracing::info;

use crate::schema::{CanBridgeConfigFile, CanConfigFile, ModbusBridgeConfigFile};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed JSON in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Flat-file JSON configuration store under a config directory, per
/// spec.md §6. Only the documents this crate's in-scope components
/// actually consume are implemented: `modbus_devices.json`,
/// `can_config.json`, `modbus_mqtt_bridge.json`, `can_mqtt_bridge.json`,
/// `mqtt_config.json`. `users.json`, `network_config.json`,
/// `alarm_config.json`, and backup/restore bundling belong to the
/// out-of-scope HTTP/auth/alarm surface and are not implemented here.
///
/// Grounded on `config.py`'s `EFIO_CONFIG_DIR` convention.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn load<T: DeserializeOwned + Default>(&self, file_name: &str) -> Result<T, ConfigError> {
        let path = self.dir.join(file_name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse { path, source }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(file = file_name, "config file missing, using defaults");
                Ok(T::default())
            }
            Err(source) => Err(ConfigError::Read { path, source }),
        }
    }

    /// Persists `value` to `file_name`, creating the config directory if
    /// needed. Write-through per spec.md §6: callers persist first, then
    /// update their own in-memory copy with the same value they just wrote.
    async fn save<T: Serialize + Sync>(&self, file_name: &str, value: &T) -> Result<(), ConfigError> {
        let path = self.dir.join(file_name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ConfigError::Write { path: path.clone(), source })?;
        }
        let body = serde_json::to_vec_pretty(value)
            .map_err(|source| ConfigError::Parse { path: path.clone(), source })?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|source| ConfigError::Write { path, source })
    }

    pub async fn load_modbus_devices(&self) -> Result<Vec<ModbusDevice>, ConfigError> {
        self.load("modbus_devices.json").await
    }

    pub async fn save_modbus_devices(&self, devices: &[ModbusDevice]) -> Result<(), ConfigError> {
        self.save("modbus_devices.json", &devices).await
    }

    pub async fn load_can_config(&self) -> Result<CanConfigFile, ConfigError> {
        self.load("can_config.json").await
    }

    pub async fn save_can_config(&self, config: &CanConfigFile) -> Result<(), ConfigError> {
        self.save("can_config.json", config).await
    }

    pub async fn load_modbus_bridge_config(&self) -> Result<ModbusBridgeConfigFile, ConfigError> {
        self.load("modbus_mqtt_bridge.json").await
    }

    pub async fn save_modbus_bridge_config(&self, config: &ModbusBridgeConfigFile) -> Result<(), ConfigError> {
        self.save("modbus_mqtt_bridge.json", config).await
    }

    pub async fn load_can_bridge_config(&self) -> Result<CanBridgeConfigFile, ConfigError> {
        self.load("can_mqtt_bridge.json").await
    }

    pub async fn save_can_bridge_config(&self, config: &CanBridgeConfigFile) -> Result<(), ConfigError> {
        self.save("can_mqtt_bridge.json", config).await
    }

    pub async fn load_mqtt_config(&self) -> Result<MqttConfig, ConfigError> {
        self.load("mqtt_config.json").await
    }

    pub async fn save_mqtt_config(&self, config: &MqttConfig) -> Result<(), ConfigError> {
        self.save("mqtt_config.json", config).await
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        let devices = store.load_modbus_devices().await.unwrap();
        assert!(devices.is_empty());
    }

    #[tokio::test]
    async fn round_trips_mqtt_config() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        let config = MqttConfig {
            broker: "test-broker".to_string(),
            ..MqttConfig::default()
        };
        store.save_mqtt_config(&config).await.unwrap();

        let loaded = store.load_mqtt_config().await.unwrap();
        assert_eq!(loaded.broker, "test-broker");
    }

    #[tokio::test]
    async fn round_trips_can_config() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        let mut config = CanConfigFile::default();
        config.auto_connect = true;
        config.controller.bitrate = 250_000;
        store.save_can_config(&config).await.unwrap();

        let loaded = store.load_can_config().await.unwrap();
        assert!(loaded.auto_connect);
        assert_eq!(loaded.controller.bitrate, 250_000);
    }
}
