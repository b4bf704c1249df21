use std::{collections::HashMap, time::Instant};

use tokio::sync::Mutex;

/// Coarse health status for a component, as reported by
/// `io_manager.py`'s `health_status.update(name, status, message)` calls
/// and by `watchdog.py`'s component health checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    /// No check has run yet for this component.
    Unknown,
}

impl HealthStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    pub message: String,
    pub last_check: Option<Instant>,
    /// Consecutive unhealthy/error checks since the last healthy one.
    pub failures: u32,
}

impl Default for ComponentHealth {
    fn default() -> Self {
        Self {
            status: HealthStatus::Unknown,
            message: String::new(),
            last_check: None,
            failures: 0,
        }
    }
}

/// Registry of named component health records, shared across the gateway's
/// device managers and consulted by the watchdog's health sweep.
///
/// Grounded on `io_manager.py`'s module-level `health_status` object and
/// `watchdog.py`'s `register_component`/`check_all_components`, merged into
/// one registry that both push-updates (`update`) and pull-checks
/// (`register_check`) can populate.
#[derive(Debug, Default)]
pub struct HealthRegistry {
    components: Mutex<HashMap<String, ComponentHealth>>,
}

impl HealthRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push-style update, used by components that observe their own health
    /// as a side effect of normal operation (GPIO reads, CAN hardware
    /// checks).
    pub async fn update(&self, name: &str, status: HealthStatus, message: impl Into<String>) {
        let mut components = self.components.lock().await;
        let entry = components.entry(name.to_string()).or_default();
        entry.failures = match status {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded | HealthStatus::Unhealthy => entry.failures + 1,
        };
        entry.status = status;
        entry.message = message.into();
        entry.last_check = Some(Instant::now());
    }

    pub async fn get(&self, name: &str) -> Option<ComponentHealth> {
        self.components.lock().await.get(name).cloned()
    }

    /// Snapshot of every registered component's health, used by the
    /// watchdog's `get_health_report` and by the HTTP health endpoint.
    pub async fn report(&self) -> HashMap<String, ComponentHealth> {
        self.components.lock().await.clone()
    }

    /// True if every registered component is currently healthy.
    pub async fn all_healthy(&self) -> bool {
        self.components
            .lock()
            .await
            .values()
            .all(|c| c.status == HealthStatus::Healthy)
    }

    /// Aggregate status per spec.md §3: unhealthy if any component is
    /// unhealthy, else degraded if any is degraded, else healthy. `Unknown`
    /// components (registered but never checked) don't themselves drag the
    /// overall status down.
    pub async fn overall(&self) -> HealthStatus {
        let components = self.components.lock().await;
        if components.values().any(|c| c.status == HealthStatus::Unhealthy) {
            HealthStatus::Unhealthy
        } else if components.values().any(|c| c.status == HealthStatus::Degraded) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn tracks_consecutive_failures() {
        let registry = HealthRegistry::new();
        registry.update("gpio", HealthStatus::Degraded, "read failed").await;
        registry.update("gpio", HealthStatus::Degraded, "read failed").await;
        let health = registry.get("gpio").await.unwrap();
        assert_eq!(health.failures, 2);

        registry.update("gpio", HealthStatus::Healthy, "recovered").await;
        let health = registry.get("gpio").await.unwrap();
        assert_eq!(health.failures, 0);
        assert!(registry.all_healthy().await);
    }
}
