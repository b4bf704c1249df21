//! Shared outbound MQTT client for the EdgeForce gateway: one connection
//! shared by the Modbus and CAN bridges, a breaker around publish attempts,
//! reconnect-with-backoff, and inbound command fan-out for
//! `edgeforce/io/do/{n}[/set]` writes.

#![cfg_attr(not(test), deny(clippy::unwrap_in_result))]

mod client;
mod config;
mod error;
mod topic;

pub use client::MqttClient;
pub use config::MqttConfig;
pub use error::MqttError;
pub use topic::{parse_command, IoCommand};
