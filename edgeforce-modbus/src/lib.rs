//! Modbus RTU device manager for the EdgeForce gateway: per-device serial
//! connections over RS-485, a per-register polling loop, liveness checks,
//! and circuit breakers, one per device plus one daisy-chain lock per
//! serial port.

#![cfg_attr(not(test), deny(clippy::unwrap_in_result))]

mod crc;
mod manager;
mod transport;
mod types;

pub use crc::crc16;
pub use manager::{ModbusError, ModbusManager};
pub use transport::{SerialTransport, SimulatedSerialTransport};
pub use types::{
    FunctionCode, ModbusDevice, Parity, PollSample, PollingConfig, ReadRequest, RegisterDef,
    RegisterValue, ScalingTriple, WriteRequest,
};
