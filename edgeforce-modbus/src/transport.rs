use edgeforce_resilience::TransportErrorKind;

/// Seam between the connection/poller logic and the physical serial line.
/// A real implementation opens `/dev/ttyS*` at the configured baud/parity/
/// stopbits and exchanges raw RTU frames (address + PDU + CRC16, built via
/// [`crate::crc::crc16`]); [`SimulatedSerialTransport`] is the one shipped
/// here, since there's no physical RS-485 bus to test against.
pub trait SerialTransport: Send {
    /// Sends `frame` (address + PDU, CRC not yet appended) and returns the
    /// peer's response frame (address + PDU, CRC already stripped and
    /// verified). A 1.0s request timeout is the caller's responsibility
    /// (wrapping this call); implementations should return
    /// `TransportErrorKind::Timeout` if they have a tighter internal
    /// timeout.
    fn transact(&mut self, frame: &[u8]) -> Result<Vec<u8>, TransportErrorKind>;
}

/// In-memory transport for tests and for running the gateway without real
/// hardware: holds a fixed register file and answers FC3/FC4/FC5/FC6
/// requests against it.
#[derive(Debug, Default)]
pub struct SimulatedSerialTransport {
    pub registers: std::collections::HashMap<u16, u16>,
    pub fail_next: bool,
}

impl SimulatedSerialTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_register(mut self, address: u16, value: u16) -> Self {
        self.registers.insert(address, value);
        self
    }
}

impl SerialTransport for SimulatedSerialTransport {
    fn transact(&mut self, frame: &[u8]) -> Result<Vec<u8>, TransportErrorKind> {
        if self.fail_next {
            self.fail_next = false;
            return Err(TransportErrorKind::Timeout);
        }
        if frame.len() < 6 {
            return Err(TransportErrorKind::MalformedFrame("frame too short".into()));
        }
        let slave = frame[0];
        let function = frame[1];
        let address = u16::from_be_bytes([frame[2], frame[3]]);
        match function {
            3 | 4 => {
                let count = u16::from_be_bytes([frame[4], frame[5]]);
                let mut response = vec![slave, function, (count * 2) as u8];
                for i in 0..count {
                    let value = self
                        .registers
                        .get(&(address + i))
                        .copied()
                        .unwrap_or(0);
                    response.extend_from_slice(&value.to_be_bytes());
                }
                Ok(response)
            }
            5 | 6 => {
                let value = u16::from_be_bytes([frame[4], frame[5]]);
                self.registers.insert(address, value);
                Ok(frame.to_vec())
            }
            _ => Err(TransportErrorKind::MalformedFrame(format!(
                "unsupported function code {function}"
            ))),
        }
    }
}
