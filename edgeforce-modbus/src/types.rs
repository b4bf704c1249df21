use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Modbus function codes this gateway speaks. 1/2 read discrete bits, 3/4
/// read holding/input registers, 5/6 write a single coil/register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum FunctionCode {
    ReadCoils = 1,
    ReadDiscreteInputs = 2,
    ReadHoldingRegisters = 3,
    ReadInputRegisters = 4,
    WriteSingleCoil = 5,
    WriteSingleRegister = 6,
}

impl FunctionCode {
    #[must_use]
    pub fn is_read(self) -> bool {
        matches!(
            self,
            FunctionCode::ReadCoils
                | FunctionCode::ReadDiscreteInputs
                | FunctionCode::ReadHoldingRegisters
                | FunctionCode::ReadInputRegisters
        )
    }

    #[must_use]
    pub fn is_write(self) -> bool {
        matches!(
            self,
            FunctionCode::WriteSingleCoil | FunctionCode::WriteSingleRegister
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    None,
    Even,
    Odd,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScalingTriple {
    pub multiplier: f64,
    pub offset: f64,
    pub decimals: u32,
}

impl ScalingTriple {
    /// `round(value * multiplier + offset, decimals)`, matching
    /// `modbus_mqtt_bridge.py`'s scaling formula exactly.
    #[must_use]
    pub fn apply(&self, raw_value: f64) -> f64 {
        let scaled = raw_value.mul_add(self.multiplier, self.offset);
        let factor = 10f64.powi(self.decimals as i32);
        (scaled * factor).round() / factor
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterDef {
    pub address: u16,
    pub function_code: FunctionCode,
    pub name: String,
    pub scaling: Option<ScalingTriple>,
    pub unit: Option<String>,
    pub poll: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    pub enabled: bool,
    /// Milliseconds; must be >= 500 per spec.
    pub interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusDevice {
    pub id: String,
    pub name: String,
    pub description: String,
    pub port: String,
    pub slave_id: u8,
    pub baudrate: u32,
    pub parity: Parity,
    pub stopbits: u8,
    pub registers: Vec<RegisterDef>,
    pub polling: PollingConfig,
    #[serde(skip)]
    pub connected: bool,
    #[serde(skip)]
    pub polling_active: bool,
    #[serde(skip)]
    pub last_connected_at: Option<u64>,
}

impl ModbusDevice {
    /// Validates the invariant from spec.md §3: function codes 5/6 are
    /// write-only, 1-4 are read-only, and the slave id / stopbits /
    /// polling interval fall within their allowed ranges.
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=247).contains(&self.slave_id) {
            return Err(format!("slave id {} out of range 1..=247", self.slave_id));
        }
        if self.stopbits != 1 && self.stopbits != 2 {
            return Err(format!("invalid stopbits {}", self.stopbits));
        }
        if self.polling.enabled && self.polling.interval_ms < 500 {
            return Err(format!(
                "polling interval {}ms below 500ms floor",
                self.polling.interval_ms
            ));
        }
        for register in &self.registers {
            match register.function_code {
                FunctionCode::WriteSingleCoil | FunctionCode::WriteSingleRegister => {}
                _ if register.function_code.is_read() => {}
                _ => return Err(format!("unsupported function code on register {}", register.address)),
            }
        }
        Ok(())
    }
}

/// A single register read result, as returned by [`crate::manager::ModbusManager::read`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterValue {
    pub register: u16,
    pub value: u16,
}

#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub device_id: String,
    pub register: u16,
    pub count: u16,
    pub function_code: FunctionCode,
}

#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub device_id: String,
    pub register: u16,
    pub value: u16,
    pub function_code: FunctionCode,
}

/// A single observed poll cycle result for one device, fanned out to
/// subscribers (the Modbus->MQTT bridge, logs).
#[derive(Debug, Clone)]
pub struct PollSample {
    pub device_id: String,
    pub register: RegisterDef,
    pub raw_value: u16,
    pub observed_at: std::time::SystemTime,
}

pub(crate) type Timestamp = Instant;
