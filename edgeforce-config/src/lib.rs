//! JSON configuration store for the EdgeForce gateway: loads and saves the
//! device, bridge, and MQTT configuration documents kept under a single
//! config directory, per spec.md §6.
//!
//! `users.json`, `network_config.json`, `alarm_config.json`, and the
//! backup/restore tar.gz bundle are out of scope; see `SPEC_FULL.md`.

mod schema;
mod store;

pub use schema::{CanBridgeConfigFile, CanConfigFile, CanControllerConfig, ModbusBridgeConfigFile};
pub use store::{ConfigError, ConfigStore};
