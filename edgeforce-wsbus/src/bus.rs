use std::{sync::Arc, time::Duration};

use edgeforce_gpio::GpioFront;
use edgeforce_iostate::{IoState, CHANNEL_COUNT};
use edgeforce_mqtt::MqttClient;
use edgeforce_resilience::EdgeForceError;
use serde::Serialize;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::warn;

use crate::types::{IoUpdate, SystemMetrics, WsOutboundMessage};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);
const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

#[derive(Serialize)]
struct DoFeedback {
    value: u8,
}

/// WebSocket bus: fans DI/DO state changes and system metrics samples out to
/// every connected client, and accepts validated `set_do` commands, relaying
/// them to the GPIO front-end and to MQTT.
///
/// Grounded on spec.md §4.10; the subscriber fan-out mechanism follows the
/// same `tokio::sync::broadcast` pattern used by `edgeforce-iostate` and
/// `edgeforce-can` for their own subscriber lists (spec.md §9 "Callback-based
/// subscribers -> message passing").
pub struct WsBus {
    io_state: Arc<IoState>,
    gpio: Arc<GpioFront>,
    mqtt: Arc<MqttClient>,
    out_tx: broadcast::Sender<WsOutboundMessage>,
}

impl WsBus {
    #[must_use]
    pub fn new(io_state: Arc<IoState>, gpio: Arc<GpioFront>, mqtt: Arc<MqttClient>) -> Arc<Self> {
        let (out_tx, _) = broadcast::channel(OUTBOUND_CHANNEL_CAPACITY);
        Arc::new(Self {
            io_state,
            gpio,
            mqtt,
            out_tx,
        })
    }

    /// Subscribes to outbound messages, one receiver per connected
    /// WebSocket client.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<WsOutboundMessage> {
        self.out_tx.subscribe()
    }

    /// Pushes a system metrics sample to every connected client. Called by
    /// whatever out-of-scope collaborator samples CPU/RAM/temperature.
    pub fn publish_metrics(&self, metrics: SystemMetrics) {
        let _ = self.out_tx.send(WsOutboundMessage::SystemMetrics(metrics));
    }

    /// Spawns the two reactive loops: one re-broadcasting on every distinct
    /// DI/DO transition, one firing an unconditional heartbeat every 2s.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let bus = Arc::clone(self);
        tokio::spawn(async move {
            let mut changes = bus.io_state.subscribe();
            let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                tokio::select! {
                    event = changes.recv() => {
                        match event {
                            Ok(change) => {
                                tracing::debug!(kind = ?change.kind, channel = change.channel, value = change.value, "io change, broadcasting io_update");
                                bus.broadcast_io_update().await;
                            }
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                warn!(skipped, "wsbus: io change subscriber lagged, resyncing");
                                bus.broadcast_io_update().await;
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                    _ = heartbeat.tick() => {
                        bus.broadcast_io_update().await;
                    }
                }
            }
        })
    }

    async fn broadcast_io_update(&self) {
        let di = self.io_state.get_di().await.unwrap_or([0; CHANNEL_COUNT]);
        let r#do = self.io_state.get_do().await.unwrap_or([0; CHANNEL_COUNT]);
        let simulation = self.io_state.get_simulation().await;
        let _ = self.out_tx.send(WsOutboundMessage::IoUpdate(IoUpdate {
            di,
            r#do,
            simulation,
        }));
    }

    /// Handles an inbound `set_do {channel, value}` command: validates
    /// against `IoState`'s own range checks, writes through the GPIO
    /// front-end (state first, hardware best-effort, per spec.md §4.3), then
    /// publishes the new value to MQTT retained, per spec.md §5's ordering
    /// guarantee (a): state is authoritative before the MQTT feedback
    /// publish is attempted.
    pub async fn handle_set_do(&self, channel: usize, value: u8) -> Result<(), EdgeForceError> {
        validate(channel, value)?;

        self.gpio.write_output(channel, value).await;

        let topic = format!("edgeforce/io/do/{}", channel + 1);
        if let Err(err) = self
            .mqtt
            .publish_json(&topic, &DoFeedback { value }, true)
            .await
        {
            warn!(%err, channel, "wsbus: MQTT feedback publish failed");
        }

        Ok(())
    }
}

fn validate(channel: usize, value: u8) -> Result<(), EdgeForceError> {
    if channel >= CHANNEL_COUNT {
        return Err(EdgeForceError::Validation(format!(
            "invalid channel {channel} (must be 0-{})",
            CHANNEL_COUNT - 1
        )));
    }
    if value > 1 {
        return Err(EdgeForceError::Validation(format!(
            "invalid value {value} (must be 0 or 1)"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use edgeforce_gpio::simulated::SimulatedGpioBackend;
    use edgeforce_mqtt::MqttConfig;
    use pretty_assertions::assert_eq;

    use super::*;

    async fn test_bus() -> Arc<WsBus> {
        let io_state = Arc::new(IoState::new());
        io_state.set_simulation(true).await;
        let health = Arc::new(edgeforce_resilience::HealthRegistry::new());
        let gpio = GpioFront::new(Box::new(SimulatedGpioBackend::new()), Arc::clone(&io_state), health).await;
        let (mqtt, _eventloop) = MqttClient::new(&MqttConfig { enabled: false, ..MqttConfig::default() });
        WsBus::new(io_state, gpio, mqtt)
    }

    #[tokio::test]
    async fn set_do_writes_through_to_state() {
        let bus = test_bus().await;
        bus.handle_set_do(1, 1).await.unwrap();
        assert_eq!(bus.io_state.get_do().await.unwrap()[1], 1);
    }

    #[tokio::test]
    async fn set_do_rejects_out_of_range_channel() {
        let bus = test_bus().await;
        let err = bus.handle_set_do(9, 1).await.unwrap_err();
        assert!(matches!(err, EdgeForceError::Validation(_)));
    }

    #[tokio::test]
    async fn change_triggers_io_update_broadcast() {
        let bus = test_bus().await;
        let mut rx = bus.subscribe();
        let handle = bus.start();

        bus.handle_set_do(0, 1).await.unwrap();

        let message = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("expected a broadcast before timeout")
            .unwrap();
        assert!(matches!(message, WsOutboundMessage::IoUpdate(update) if update.r#do[0] == 1));

        handle.abort();
    }
}
