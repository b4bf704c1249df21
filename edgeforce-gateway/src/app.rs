use std::{path::Path, sync::Arc, time::Duration};

use edgeforce_bridge::{CanMqttBridge, ModbusMqttBridge};
use edgeforce_can::{CanManager, Crystal, SimulatedSpiBackend};
use edgeforce_config::ConfigStore;
use edgeforce_gpio::{simulated::SimulatedGpioBackend, GpioFront};
use edgeforce_iostate::{IoState, CHANNEL_COUNT};
use edgeforce_modbus::{ModbusManager, SimulatedSerialTransport};
use edgeforce_mqtt::MqttClient;
use edgeforce_resilience::HealthRegistry;
use edgeforce_watchdog::Watchdog;
use edgeforce_wsbus::WsBus;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::Result;

const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(60);
const GPIO_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Every long-lived component the gateway wires together, handed to the
/// HTTP/WebSocket layer as shared state.
///
/// Grounded on `efio_daemon/daemon.py`'s composition root: the original
/// builds every manager/bridge at startup in the same dependency order
/// this struct's fields are constructed in (`build`, below).
pub struct AppState {
    pub health: Arc<HealthRegistry>,
    pub io_state: Arc<IoState>,
    pub gpio: Arc<GpioFront>,
    pub modbus: Arc<ModbusManager>,
    pub can: Arc<CanManager>,
    pub mqtt: Arc<MqttClient>,
    pub modbus_bridge: Arc<ModbusMqttBridge>,
    pub can_bridge: Arc<CanMqttBridge>,
    pub watchdog: Arc<Watchdog>,
    pub wsbus: Arc<WsBus>,
}

/// Builds every component in dependency order (resilience -> state -> GPIO
/// -> Modbus/CAN -> MQTT -> bridges -> watchdog -> HTTP/WS, per DESIGN.md's
/// "DESIGN NOTES §9" wiring order) and starts their background tasks.
///
/// Device connections use this crate's simulated transports
/// (`SimulatedSerialTransport`, `SimulatedSpiBackend`) since no real
/// `/dev/ttyS*`/`/dev/spidevB.D` backend is wired into this workspace; see
/// DESIGN.md.
pub async fn build(config_dir: &Path, simulate_gpio: bool) -> Result<Arc<AppState>> {
    let health = Arc::new(HealthRegistry::new());
    let io_state = Arc::new(IoState::new());
    let store = ConfigStore::new(config_dir);

    if simulate_gpio {
        io_state.set_simulation(true).await;
    }
    let gpio = GpioFront::new(
        Box::new(SimulatedGpioBackend::new()),
        Arc::clone(&io_state),
        Arc::clone(&health),
    )
    .await;

    let modbus = ModbusManager::new(Arc::clone(&health));
    let modbus_devices = store.load_modbus_devices().await?;
    for device in modbus_devices {
        let device_id = device.id.clone();
        if let Err(err) = modbus.register_device(device).await {
            warn!(device_id, %err, "skipping invalid modbus device from config");
            continue;
        }
        let connect_result = modbus
            .connect(&device_id, || {
                Box::new(SimulatedSerialTransport::new()) as Box<dyn edgeforce_modbus::SerialTransport>
            })
            .await;
        if let Err(err) = connect_result {
            warn!(device_id, ?err, "modbus device connect failed");
        }
    }

    let can_config = store.load_can_config().await?;
    let crystal = match can_config.controller.crystal_mhz {
        8 => Crystal::Mhz8,
        20 => Crystal::Mhz20,
        _ => Crystal::Mhz16,
    };
    let can = CanManager::new(crystal, Arc::clone(&health));
    for device in can_config.devices {
        let device_name = device.name.clone();
        if let Err(err) = can.add_device(device).await {
            warn!(device_name, ?err, "skipping invalid can device from config");
        }
    }
    if can_config.auto_connect {
        if let Err(err) = can
            .connect(can_config.controller.bitrate, || {
                Box::new(SimulatedSpiBackend::new()) as Box<dyn edgeforce_can::SpiBackend>
            })
            .await
        {
            warn!(?err, "can controller connect failed");
        }
    }

    let mqtt_config = store.load_mqtt_config().await?;
    let (mqtt, eventloop) = MqttClient::new(&mqtt_config);
    if let Some(eventloop) = eventloop {
        let driver = Arc::clone(&mqtt);
        tokio::spawn(driver.run(eventloop));
    }
    start_mqtt_command_loop(Arc::clone(&mqtt), Arc::clone(&gpio));
    start_mqtt_state_republish_loop(Arc::clone(&mqtt), Arc::clone(&io_state));

    let modbus_bridge = ModbusMqttBridge::new(Arc::clone(&modbus), Arc::clone(&mqtt));
    let modbus_bridge_config = store.load_modbus_bridge_config().await?;
    modbus_bridge.set_mappings(modbus_bridge_config.mappings).await;
    modbus_bridge
        .set_poll_interval(Duration::from_secs_f64(modbus_bridge_config.poll_interval_secs.max(0.5)))
        .await;
    if modbus_bridge_config.enabled {
        if let Err(reason) = modbus_bridge.start().await {
            warn!(reason, "modbus-mqtt bridge did not start");
        }
    }

    let can_bridge = CanMqttBridge::new(Arc::clone(&can), Arc::clone(&mqtt));
    let can_bridge_config = store.load_can_bridge_config().await?;
    can_bridge.set_mappings(can_bridge_config.mappings).await;
    if can_bridge_config.enabled {
        if let Err(reason) = can_bridge.start().await {
            warn!(reason, "can-mqtt bridge did not start");
        }
    }

    let watchdog = Watchdog::new(WATCHDOG_TIMEOUT);
    register_watchdog_checks(&watchdog, &health).await;
    watchdog.start();

    let wsbus = WsBus::new(Arc::clone(&io_state), Arc::clone(&gpio), Arc::clone(&mqtt));
    wsbus.start();

    start_gpio_poll_loop(Arc::clone(&gpio));

    info!("edgeforce gateway core wired and running");

    Ok(Arc::new(AppState {
        health,
        io_state,
        gpio,
        modbus,
        can,
        mqtt,
        modbus_bridge,
        can_bridge,
        watchdog,
        wsbus,
    }))
}

/// Dedicated 10 Hz DI poll loop, per DESIGN.md's scheduling model ("one GPIO
/// poll loop" alongside the device pollers and liveness checkers). DO writes
/// are event-driven (`write_output`, called directly from the HTTP/WS
/// handlers) and need no loop of their own.
fn start_gpio_poll_loop(gpio: Arc<GpioFront>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(GPIO_POLL_INTERVAL);
        loop {
            ticker.tick().await;
            gpio.read_all_inputs().await;
        }
    });
}

#[derive(Serialize)]
struct ChannelState {
    value: u8,
}

/// Consumes `MqttClient`'s inbound command fan-out: every decoded
/// `edgeforce/io/do/{n}[/set]` write converts the topic's 1-based channel
/// `n` to IoState's 0-based index and applies it through the GPIO
/// front-end, per spec.md §4.8 ("update IOState channel `n-1` and notify
/// subscribers" — `write_output` both writes IoState, which notifies its
/// own subscribers on a distinct change, and best-effort mirrors the write
/// to hardware).
fn start_mqtt_command_loop(mqtt: Arc<MqttClient>, gpio: Arc<GpioFront>) {
    tokio::spawn(async move {
        let mut commands = mqtt.subscribe_commands();
        loop {
            match commands.recv().await {
                Ok(command) => {
                    let Some(channel) = (command.channel as usize).checked_sub(1) else {
                        warn!(channel = command.channel, "mqtt: ignoring do command for channel 0");
                        continue;
                    };
                    if channel >= CHANNEL_COUNT {
                        warn!(channel = command.channel, "mqtt: ignoring out-of-range do command");
                        continue;
                    }
                    debug!(channel, value = command.value, "mqtt: applying inbound do command");
                    gpio.write_output(channel, u8::from(command.value)).await;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "mqtt: command subscriber lagged, resuming");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    });
}

/// Republishes retained DI/DO state on every (re)connect, per spec.md §4.8
/// ("on connect, publish retained DI/DO state").
fn start_mqtt_state_republish_loop(mqtt: Arc<MqttClient>, io_state: Arc<IoState>) {
    tokio::spawn(async move {
        let mut connected = mqtt.subscribe_connected();
        loop {
            match connected.recv().await {
                Ok(()) => republish_io_state(&mqtt, &io_state).await,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    });
}

async fn republish_io_state(mqtt: &MqttClient, io_state: &IoState) {
    let di = io_state.get_di().await.unwrap_or([0; CHANNEL_COUNT]);
    let r#do = io_state.get_do().await.unwrap_or([0; CHANNEL_COUNT]);
    for (index, value) in di.iter().enumerate() {
        let topic = format!("edgeforce/io/di/{}", index + 1);
        if let Err(err) = mqtt.publish_json(&topic, &ChannelState { value: *value }, true).await {
            warn!(%err, topic, "mqtt: failed to republish DI state on connect");
        }
    }
    for (index, value) in r#do.iter().enumerate() {
        let topic = format!("edgeforce/io/do/{}", index + 1);
        if let Err(err) = mqtt.publish_json(&topic, &ChannelState { value: *value }, true).await {
            warn!(%err, topic, "mqtt: failed to republish DO state on connect");
        }
    }
}

async fn register_watchdog_checks(watchdog: &Arc<Watchdog>, health: &Arc<HealthRegistry>) {
    for name in ["gpio", "modbus", "can", "mqtt"] {
        let health = Arc::clone(health);
        let component = name.to_string();
        watchdog
            .register_component(
                name,
                Arc::new(move || {
                    let health = Arc::clone(&health);
                    let component = component.clone();
                    Box::pin(async move {
                        health
                            .get(&component)
                            .await
                            .is_none_or(|h| h.status == edgeforce_resilience::HealthStatus::Healthy)
                    })
                }),
            )
            .await;
    }
}
