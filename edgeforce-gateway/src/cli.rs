use std::path::PathBuf;

use clap::Parser;

/// Command-line flags for the EdgeForce gateway daemon.
#[derive(Debug, Parser)]
#[command(
    name = "edgeforce-gateway",
    about = "Industrial edge gateway: Modbus/CAN device integration, MQTT bridges, and a WebSocket bus",
    version
)]
pub struct CliArgs {
    /// Directory holding the JSON configuration documents
    /// (`modbus_devices.json`, `can_config.json`, bridge mappings,
    /// `mqtt_config.json`).
    #[arg(long, value_name = "DIR", default_value = "./config")]
    pub config_dir: PathBuf,

    /// Run with the simulated GPIO backend instead of attempting real
    /// hardware bring-up.
    #[arg(long)]
    pub simulate_gpio: bool,

    /// Minimum tracing level (`error`, `warn`, `info`, `debug`, `trace`).
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// If set, logs are additionally written to a rolling daily file under
    /// this directory.
    #[arg(long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Address the HTTP/WebSocket surface binds to.
    #[arg(long, value_name = "ADDR", default_value = "0.0.0.0:8080")]
    pub bind: String,
}
