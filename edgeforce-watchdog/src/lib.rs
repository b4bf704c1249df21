//! Supervisory watchdog for the EdgeForce gateway: a fed-timestamp timeout
//! detector plus a registry of named pull-style health checks, run on a 1Hz
//! loop with a 10s unconditional health sweep.

#![cfg_attr(not(test), deny(clippy::unwrap_in_result))]

mod types;
mod watchdog;

pub use types::{
    ComponentStatus, WatchdogComponentReport, WatchdogReport, WatchdogSelfReport,
};
pub use watchdog::{HealthCheck, Watchdog};
