use crate::backend::{GpioBackend, GpioError, CHANNEL_COUNT};

/// In-memory GPIO backend used when no real hardware is present, and as the
/// fallback a [`crate::front::GpioFront`] degrades to after repeated
/// hardware failures. Mirrors `state["simulation"]` mode in the original:
/// inputs read back whatever was last written via [`Self::set_inputs`]
/// (there's no hardware loop driving them), outputs are just recorded.
#[derive(Debug, Default)]
pub struct SimulatedGpioBackend {
    inputs: [u8; CHANNEL_COUNT],
    outputs: [u8; CHANNEL_COUNT],
}

impl SimulatedGpioBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/demo hook: drive the simulated input state externally.
    pub fn set_inputs(&mut self, values: [u8; CHANNEL_COUNT]) {
        self.inputs = values;
    }

    #[must_use]
    pub fn outputs(&self) -> [u8; CHANNEL_COUNT] {
        self.outputs
    }
}

impl GpioBackend for SimulatedGpioBackend {
    fn init(&mut self) -> Result<(), GpioError> {
        Ok(())
    }

    fn read_inputs(&mut self) -> Result<[u8; CHANNEL_COUNT], GpioError> {
        Ok(self.inputs)
    }

    fn write_output(&mut self, channel: usize, value: u8) -> Result<(), GpioError> {
        self.outputs[channel] = value;
        Ok(())
    }
}

/// A backend that always fails, used in tests to exercise the breaker/
/// reinit fallback path.
#[derive(Debug, Default)]
pub struct AlwaysFailingBackend {
    pub init_succeeds: bool,
}

impl GpioBackend for AlwaysFailingBackend {
    fn init(&mut self) -> Result<(), GpioError> {
        if self.init_succeeds {
            Ok(())
        } else {
            Err(GpioError::RequestFailed("simulated init failure".into()))
        }
    }

    fn read_inputs(&mut self) -> Result<[u8; CHANNEL_COUNT], GpioError> {
        Err(GpioError::ReadFailed {
            chip: "test".into(),
            line: 0,
            reason: "simulated failure".into(),
        })
    }

    fn write_output(&mut self, _channel: usize, _value: u8) -> Result<(), GpioError> {
        Err(GpioError::WriteFailed {
            chip: "test".into(),
            line: 0,
            reason: "simulated failure".into(),
        })
    }
}
