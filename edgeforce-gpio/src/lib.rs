//! GPIO front-end for the EdgeForce gateway: breaker-protected hardware
//! access over four digital inputs and four digital outputs, with a
//! simulation fallback and backoff-driven reinit loop when the real
//! hardware misbehaves.

#![cfg_attr(not(test), deny(clippy::unwrap_in_result))]

mod backend;
mod front;
pub mod simulated;

pub use backend::{GpioBackend, GpioError, CHANNEL_COUNT};
pub use front::GpioFront;
