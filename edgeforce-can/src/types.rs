use std::time::{Instant, SystemTime};

use serde::{Deserialize, Serialize};

/// Direction a [`CanFrame`] traveled, matching the `direction` field the
/// original daemon stamps on every log entry (`'RX'`/`'TX'`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Rx,
    Tx,
}

/// A single CAN 2.0A/B frame, observed on either the RX or TX path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanFrame {
    pub can_id: u32,
    pub dlc: u8,
    pub data: Vec<u8>,
    pub extended: bool,
    pub rtr: bool,
    pub direction: Direction,
    pub timestamp: SystemTime,
}

/// Optional acceptance filter for a device, programmed into the MCP2515's
/// RXFn/RXMn registers when present (see DESIGN.md's "SPI filter
/// programming" decision); `None` means the device's messages are picked
/// out of the shared RX stream purely by matching `can_id` in software.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AcceptFilter {
    pub id: u32,
    pub mask: u32,
    pub extended: bool,
}

/// A logical CAN endpoint: a single CAN ID this gateway cares about,
/// tracked for liveness independently of every other device on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanDevice {
    pub id: String,
    pub name: String,
    pub can_id: u32,
    pub extended: bool,
    pub enabled: bool,
    /// Seconds; must fall within 5..=300 per spec.md §3.
    pub timeout_threshold_secs: u32,
    pub accept_filter: Option<AcceptFilter>,
    #[serde(skip)]
    pub rx_count: u64,
    #[serde(skip)]
    pub tx_count: u64,
}

impl CanDevice {
    pub fn validate(&self) -> Result<(), String> {
        if !(5..=300).contains(&self.timeout_threshold_secs) {
            return Err(format!(
                "timeout_threshold_secs {} out of range 5..=300",
                self.timeout_threshold_secs
            ));
        }
        if self.can_id > 0x1FFF_FFFF || (!self.extended && self.can_id > 0x7FF) {
            return Err(format!("can_id 0x{:X} out of range for extended={}", self.can_id, self.extended));
        }
        Ok(())
    }
}

/// Per-device runtime liveness bookkeeping, kept separate from the
/// serializable [`CanDevice`] config so `rx_count`/`last_rx_time` churn
/// doesn't need a config round-trip.
pub(crate) struct DeviceRuntime {
    pub(crate) last_rx_time: Option<Instant>,
    /// Mirrors `_timeout_logged` in `can_manager.py`: set once a timeout is
    /// counted, cleared on recovery, so a sustained timeout isn't
    /// recounted on every liveness sweep.
    pub(crate) timeout_logged: bool,
}

impl Default for DeviceRuntime {
    fn default() -> Self {
        Self {
            last_rx_time: None,
            timeout_logged: false,
        }
    }
}

impl DeviceRuntime {
    pub(crate) fn is_alive(&self, timeout_threshold_secs: u32) -> bool {
        match self.last_rx_time {
            Some(last) => last.elapsed().as_secs_f64() < f64::from(timeout_threshold_secs),
            None => false,
        }
    }
}

/// Result of a single node-scan bucket: every distinct CAN ID observed
/// during the scan window, its message count, and when it was last seen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeScanEntry {
    pub can_id: u32,
    pub count: u64,
    pub last_seen: SystemTime,
}

/// Outcome of [`crate::manager::CanManager::detect_bitrate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitrateDetection {
    pub detected: bool,
    pub bitrate: Option<u32>,
    pub messages_observed: u64,
    pub errors_observed: u64,
    pub score: i64,
}

/// Snapshot of [`crate::manager::CanManager`]'s counters, the exact shape
/// `can_manager.py`'s `self.stats` dict carries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CanManagerStats {
    pub rx_total: u64,
    pub tx_total: u64,
    pub errors: u64,
    pub overruns: u64,
    pub hardware_failures: u64,
    pub device_timeouts: u64,
    pub auto_cleanups: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<SystemTime>,
}

/// A single bucket produced by [`crate::manager::CanManager::status`],
/// rolling the counters above together with the values `can_manager.py`'s
/// `get_status` computes on the fly (`uptime`, `alive_devices`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanManagerStatus {
    pub connected: bool,
    pub bitrate: u32,
    pub devices_count: usize,
    pub alive_devices: usize,
    pub stats: CanManagerStats,
    pub uptime_secs: Option<f64>,
}
