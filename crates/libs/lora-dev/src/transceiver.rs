//! Hardware contract between the device layer and transceiver drivers.
//!
//! Concrete byte protocols (SPI register maps, serial AT dialects) live
//! in external driver crates; the engine only needs mode control, frame
//! upload, and the TX-done interrupt status. All methods take
//! `&mut self`; the transmit engine serializes every access behind a
//! single register lock shared by the submission and completion paths.

/// Operating modes the engine drives a transceiver through.
///
/// Matches the subset of SX127x `RegOpMode` states the transmit path
/// uses: `Sleep` when the interface closes, `Standby` while idle and
/// armed, `Transmit` to put a committed frame on air.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpMode {
    Sleep,
    Standby,
    Transmit,
}

/// Interrupt causes read back (and cleared) on a completion interrupt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IrqFlags {
    /// The in-flight frame finished transmitting.
    pub tx_done: bool,
    /// Raw cause bits for diagnostics; unrecognized causes are logged
    /// and ignored by the engine.
    pub raw: u8,
}

impl IrqFlags {
    pub fn tx_done() -> Self {
        Self { tx_done: true, raw: 0 }
    }
}

/// Opaque failure from a driver register access.
#[derive(Debug, Clone, thiserror::Error)]
#[error("driver: {0}")]
pub struct DriverError(String);

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A transceiver as seen by the transmit engine.
pub trait Transceiver: Send + 'static {
    /// Switches the radio operating mode.
    fn set_mode(&mut self, mode: OpMode) -> Result<(), DriverError>;

    /// Resets interrupt masking so only the TX-complete condition is
    /// recognized until the next frame is armed.
    fn arm_tx_interrupt(&mut self) -> Result<(), DriverError>;

    /// Uploads a complete frame and commits its length to hardware.
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), DriverError>;

    /// Reads and clears pending interrupt causes.
    fn read_clear_irq(&mut self) -> Result<IrqFlags, DriverError>;
}
