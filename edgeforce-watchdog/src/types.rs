use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Per-component record kept by the watchdog's own pull-style health check
/// registry (distinct from `edgeforce_resilience::HealthRegistry`'s
/// push-style component table).
#[derive(Debug, Clone)]
pub struct WatchdogComponent {
    pub status: ComponentStatus,
    pub last_check: Option<DateTime<Utc>>,
    pub failures: u32,
}

impl Default for WatchdogComponent {
    fn default() -> Self {
        Self {
            status: ComponentStatus::Unknown,
            last_check: None,
            failures: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Unhealthy,
    /// The health check future panicked or otherwise could not complete.
    Error,
    Unknown,
}

impl ComponentStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ComponentStatus::Healthy => "healthy",
            ComponentStatus::Unhealthy => "unhealthy",
            ComponentStatus::Error => "error",
            ComponentStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchdogComponentReport {
    pub status: &'static str,
    pub last_check: Option<DateTime<Utc>>,
    pub failures: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchdogSelfReport {
    pub running: bool,
    pub timeout_secs: u64,
    pub last_feed: DateTime<Utc>,
    pub time_since_feed_secs: f64,
    pub timeout_count: u64,
    pub status: &'static str,
}

/// Full health report returned by `Watchdog::health_report`, mirroring
/// `watchdog.py`'s `get_health_report()` shape (`{watchdog, components}`).
#[derive(Debug, Clone, Serialize)]
pub struct WatchdogReport {
    pub watchdog: WatchdogSelfReport,
    pub components: HashMap<String, WatchdogComponentReport>,
}
