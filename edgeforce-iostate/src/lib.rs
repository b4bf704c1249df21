//! Thread-safe shared digital I/O state for the EdgeForce gateway: four
//! digital inputs, four digital outputs, simulation flags, and the Modbus
//! scratch fields the bridge reads alongside them.

#![cfg_attr(not(test), deny(clippy::unwrap_in_result))]

mod io_state;

pub use io_state::{
    ChangeEvent, ChannelKind, IoState, IoStateView, IoStats, ModbusScratch, StateSnapshot,
    CHANNEL_COUNT,
};
