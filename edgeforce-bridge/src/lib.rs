//! Protocol-bridging services sitting between the Modbus/CAN managers and
//! the shared MQTT client: a Modbus register poller and a reactive CAN
//! frame subscriber, each mapping field-bus data onto MQTT topics.

#![cfg_attr(not(test), deny(clippy::unwrap_in_result))]

mod can_bridge;
mod modbus_bridge;
mod types;

pub use can_bridge::CanMqttBridge;
pub use modbus_bridge::ModbusMqttBridge;
pub use types::{
    CanBridgeStats, CanBridgeStatus, CanJsonPayload, CanMappingStats, CanMqttMapping,
    CanPublishFormat, ModbusBridgeStatus, ModbusMqttMapping, ModbusPublishPayload,
};
