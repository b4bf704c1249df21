use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use edgeforce_resilience::{BreakerError, CircuitBreaker};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{config::MqttConfig, error::MqttError, topic::parse_command, topic::IoCommand};

const PUBLISH_BREAKER_FAILURE_THRESHOLD: u32 = 5;
const PUBLISH_BREAKER_TIMEOUT: Duration = Duration::from_secs(60);
const RECONNECT_INITIAL_DELAY: Duration = Duration::from_secs(1);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);
const COMMAND_CHANNEL_CAPACITY: usize = 64;
const WILDCARD_TOPIC: &str = "edgeforce/#";

fn qos_from(value: u8) -> QoS {
    match value {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

/// Shared outbound MQTT publisher for the gateway: a single `rumqttc`
/// connection, a breaker guarding publish attempts the way the Python
/// daemon's bridges guarded their own `client.publish()` calls, automatic
/// reconnect-with-backoff, and a broadcast fan-out of inbound commands
/// parsed off `edgeforce/io/do/{n}[/set]`.
///
/// Grounded on `modbus_mqtt_bridge.py`'s `_init_mqtt`/`_publish_to_mqtt` and
/// `can_mqtt_bridge.py`'s equivalent, which both built one client per bridge;
/// here the connection is unified into a single shared client per
/// specification, since both bridges publish to the same broker.
pub struct MqttClient {
    client: AsyncClient,
    breaker: Arc<CircuitBreaker>,
    connected: Arc<AtomicBool>,
    enabled: bool,
    default_qos: u8,
    command_tx: broadcast::Sender<IoCommand>,
    connected_tx: broadcast::Sender<()>,
}

impl MqttClient {
    /// Builds the client and returns it alongside the background task that
    /// must be spawned to drive the connection (polling the event loop,
    /// reconnecting with backoff, and fanning out inbound commands).
    ///
    /// When `config.enabled` is false, a client is still returned so callers
    /// don't need two code paths, but every publish short-circuits with
    /// [`MqttError::Disabled`] and no network connection is ever attempted.
    #[must_use]
    pub fn new(config: &MqttConfig) -> (Arc<Self>, Option<EventLoop>) {
        if !config.enabled {
            let (command_tx, _) = broadcast::channel(COMMAND_CHANNEL_CAPACITY);
            let (connected_tx, _) = broadcast::channel(1);
            let mut options = MqttOptions::new(&config.client_id, "disabled", 0);
            options.set_keep_alive(Duration::from_secs(config.keepalive_secs.into()));
            let (client, _eventloop) = AsyncClient::new(options, 1);
            let this = Arc::new(Self {
                client,
                breaker: Arc::new(CircuitBreaker::new(
                    "mqtt-publish",
                    PUBLISH_BREAKER_FAILURE_THRESHOLD,
                    PUBLISH_BREAKER_TIMEOUT,
                )),
                connected: Arc::new(AtomicBool::new(false)),
                enabled: false,
                default_qos: config.qos,
                command_tx,
                connected_tx,
            });
            return (this, None);
        }

        let mut options = MqttOptions::new(&config.client_id, &config.broker, config.port);
        options.set_keep_alive(Duration::from_secs(config.keepalive_secs.into()));
        if !config.username.is_empty() {
            options.set_credentials(&config.username, &config.password);
        }

        let (client, eventloop) = AsyncClient::new(options, 100);
        let (command_tx, _) = broadcast::channel(COMMAND_CHANNEL_CAPACITY);
        let (connected_tx, _) = broadcast::channel(1);

        let this = Arc::new(Self {
            client,
            breaker: Arc::new(CircuitBreaker::new(
                "mqtt-publish",
                PUBLISH_BREAKER_FAILURE_THRESHOLD,
                PUBLISH_BREAKER_TIMEOUT,
            )),
            connected: Arc::new(AtomicBool::new(false)),
            enabled: true,
            default_qos: config.qos,
            command_tx,
            connected_tx,
        });

        (this, Some(eventloop))
    }

    /// Drives the event loop until the process shuts down: polls for
    /// incoming packets, resubscribes to the wildcard command topic after
    /// every (re)connect, fans parsed commands out over the broadcast
    /// channel, and reconnects with doubling backoff on any connection
    /// error. Mirrors the reconnect loop every long-running component in
    /// this gateway uses (see `edgeforce-can`'s RX loop, `edgeforce-modbus`'s
    /// poller), adapted to `rumqttc`'s own auto-reconnecting event loop.
    pub async fn run(self: Arc<Self>, mut eventloop: EventLoop) {
        let mut delay = RECONNECT_INITIAL_DELAY;
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    delay = RECONNECT_INITIAL_DELAY;
                    self.connected.store(true, Ordering::Relaxed);
                    info!("mqtt connected");
                    if let Err(err) = self.client.subscribe(WILDCARD_TOPIC, QoS::AtLeastOnce).await
                    {
                        warn!(%err, "failed to subscribe to command wildcard");
                    }
                    let _ = self.connected_tx.send(());
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if let Some(command) = parse_command(&publish.topic, &publish.payload) {
                        debug!(channel = command.channel, value = command.value, "inbound command");
                        let _ = self.command_tx.send(command);
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    self.connected.store(false, Ordering::Relaxed);
                    warn!(%err, ?delay, "mqtt connection error, retrying");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(RECONNECT_MAX_DELAY);
                }
            }
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn subscribe_commands(&self) -> broadcast::Receiver<IoCommand> {
        self.command_tx.subscribe()
    }

    /// Fires once per successful (re)connect, after the wildcard
    /// resubscribe. The gateway uses this to republish retained DI/DO state
    /// per spec.md §4.8's "on connect, publish retained DI/DO state".
    pub fn subscribe_connected(&self) -> broadcast::Receiver<()> {
        self.connected_tx.subscribe()
    }

    /// Publishes `payload` as JSON to `topic` at the client's default QoS,
    /// guarded by the publish breaker. Returns [`MqttError::Disabled`]
    /// immediately when the client was constructed with `enabled = false`,
    /// without touching the breaker's failure bookkeeping.
    pub async fn publish_json<T: Serialize>(
        &self,
        topic: &str,
        payload: &T,
        retain: bool,
    ) -> Result<(), MqttError> {
        self.publish_json_with_qos(topic, payload, retain, self.default_qos).await
    }

    /// Publishes a raw byte payload at the client's default QoS, for CAN
    /// bridge mappings configured for `raw_hex`/`data_array` formats that
    /// build their own body rather than a serializable struct.
    pub async fn publish_raw(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), MqttError> {
        self.publish_raw_with_qos(topic, payload, retain, self.default_qos).await
    }

    /// Publishes `payload` as JSON at a caller-chosen QoS, for bridge
    /// mappings that carry their own per-mapping QoS (spec.md §4.7(e)
    /// "publish with mapping QoS") rather than the client's default.
    pub async fn publish_json_with_qos<T: Serialize>(
        &self,
        topic: &str,
        payload: &T,
        retain: bool,
        qos: u8,
    ) -> Result<(), MqttError> {
        if !self.enabled {
            return Err(MqttError::Disabled);
        }
        let body = serde_json::to_vec(payload)?;
        self.publish_bytes(topic, body, retain, qos_from(qos)).await
    }

    /// Publishes a raw byte payload at a caller-chosen QoS. See
    /// [`Self::publish_json_with_qos`].
    pub async fn publish_raw_with_qos(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
        qos: u8,
    ) -> Result<(), MqttError> {
        if !self.enabled {
            return Err(MqttError::Disabled);
        }
        self.publish_bytes(topic, payload, retain, qos_from(qos)).await
    }

    async fn publish_bytes(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
        qos: QoS,
    ) -> Result<(), MqttError> {
        let topic = topic.to_string();
        let result = self
            .breaker
            .call(|| async { self.client.publish(topic, qos, retain, payload).await })
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(BreakerError::Open { .. }) => Err(MqttError::BreakerOpen),
            Err(BreakerError::Inner(err)) => Err(MqttError::Publish(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn qos_mapping_defaults_to_at_least_once() {
        assert_eq!(qos_from(1), QoS::AtLeastOnce);
        assert_eq!(qos_from(7), QoS::AtLeastOnce);
        assert_eq!(qos_from(0), QoS::AtMostOnce);
        assert_eq!(qos_from(2), QoS::ExactlyOnce);
    }

    #[tokio::test]
    async fn publish_with_qos_ignores_client_default() {
        let config = MqttConfig {
            qos: 1,
            ..MqttConfig::default()
        };
        let (client, _eventloop) = MqttClient::new(&config);
        assert_eq!(client.default_qos, 1);

        // A mapping-supplied QoS of 2 must reach `publish_bytes` as
        // `ExactlyOnce`, not the client's configured default of 1. The
        // event loop is never driven here, so this only proves the call
        // is accepted and queued, not that it reaches a broker.
        let result = client
            .publish_json_with_qos("edgeforce/can/test", &serde_json::json!({"v": 1}), false, 2)
            .await;
        assert!(result.is_ok());

        let result = client.publish_raw_with_qos("edgeforce/can/test", vec![1, 2, 3], false, 0).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn disabled_client_rejects_publish() {
        let config = MqttConfig {
            enabled: false,
            ..MqttConfig::default()
        };
        let (client, eventloop) = MqttClient::new(&config);
        assert!(eventloop.is_none());
        assert!(!client.is_connected());

        let result = client.publish_json("edgeforce/system/cpu", &42, false).await;
        assert!(matches!(result, Err(MqttError::Disabled)));
    }

    #[test]
    fn enabled_client_returns_eventloop() {
        let config = MqttConfig::default();
        let (_client, eventloop) = MqttClient::new(&config);
        assert!(eventloop.is_some());
    }
}
