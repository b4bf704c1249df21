use edgeforce_iostate::CHANNEL_COUNT;
use serde::{Deserialize, Serialize};

/// Current DI/DO snapshot, broadcast to every connected client either on a
/// distinct state transition or as the unconditional 2s heartbeat.
#[derive(Debug, Clone, Serialize)]
pub struct IoUpdate {
    pub di: [u8; CHANNEL_COUNT],
    pub r#do: [u8; CHANNEL_COUNT],
    pub simulation: bool,
}

/// Minimal system metrics snapshot. The CPU/RAM/temperature probe that
/// produces these values is an out-of-scope collaborator (spec.md §1); the
/// bus only defines the shape it broadcasts on the probe's behalf.
#[derive(Debug, Clone, Serialize)]
pub struct SystemMetrics {
    pub cpu_percent: f32,
    pub ram_percent: f32,
    pub temp_c: f32,
    pub uptime_secs: u64,
}

/// One message sent to every connected WebSocket client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WsOutboundMessage {
    IoUpdate(IoUpdate),
    SystemMetrics(SystemMetrics),
}

/// One message accepted from a connected WebSocket client.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WsInboundMessage {
    SetDo { channel: usize, value: u8 },
}
