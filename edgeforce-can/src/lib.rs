//! CAN controller manager for the EdgeForce gateway: an MCP2515 SPI driver,
//! a single RX fan-out loop, per-device liveness tracking, and hardware
//! circuit breakers.

#![cfg_attr(not(test), deny(clippy::unwrap_in_result))]

mod bitrate;
mod manager;
mod mcp2515;
mod spi;
mod types;

pub use bitrate::Crystal;
pub use manager::{CanError, CanManager};
pub use mcp2515::{Mcp2515, Mode, RawFrame};
pub use spi::{SimulatedSpiBackend, SpiBackend};
pub use types::{
    AcceptFilter, BitrateDetection, CanDevice, CanFrame, CanManagerStats, CanManagerStatus,
    Direction, NodeScanEntry,
};
