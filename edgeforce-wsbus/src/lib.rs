//! WebSocket bus for the EdgeForce gateway: broadcasts DI/DO state changes
//! and system metrics samples to connected clients, and accepts inbound
//! `set_do` commands validated against the shared I/O state.

#![cfg_attr(not(test), deny(clippy::unwrap_in_result))]

mod bus;
mod types;

pub use bus::WsBus;
pub use types::{IoUpdate, SystemMetrics, WsInboundMessage, WsOutboundMessage};
