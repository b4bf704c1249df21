/// Hardware-specific errors from a [`GpioBackend`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum GpioError {
    #[error("gpio line request failed: {0}")]
    RequestFailed(String),

    #[error("gpio read failed on {chip} line {line}: {reason}")]
    ReadFailed {
        chip: String,
        line: u32,
        reason: String,
    },

    #[error("gpio write failed on {chip} line {line}: {reason}")]
    WriteFailed {
        chip: String,
        line: u32,
        reason: String,
    },

    #[error("no line request open for chip {0}")]
    NoRequest(String),
}

/// Fixed DI/DO channel count, matching the controller's four-plus-four
/// hardware layout (`INPUT_PINS`/`OUTPUT_PINS` in the original daemon).
pub const CHANNEL_COUNT: usize = 4;

/// Seam between [`crate::front::GpioFront`] and the physical (or simulated)
/// GPIO chip.
///
/// Methods are synchronous: real `gpiod` line requests are cheap ioctls, not
/// long blocking calls, so [`crate::front::GpioFront`] invokes them directly
/// from its async methods rather than routing through `spawn_blocking`. A
/// hardware implementation wraps line requests per a fixed `INPUT_PINS`/
/// `OUTPUT_PINS` table the same way this crate's
/// [`crate::simulated::SimulatedGpioBackend`] wraps an in-memory array.
pub trait GpioBackend: Send {
    /// Opens line requests for every configured input/output pin. Called
    /// once at startup and again by the reinit loop after a hardware
    /// failure.
    fn init(&mut self) -> Result<(), GpioError>;

    /// Reads all four digital inputs in pin order.
    fn read_inputs(&mut self) -> Result<[u8; CHANNEL_COUNT], GpioError>;

    /// Writes a single digital output channel.
    fn write_output(&mut self, channel: usize, value: u8) -> Result<(), GpioError>;
}
