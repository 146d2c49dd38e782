use crate::buffer::PacketBuffer;
use crate::transceiver::DriverError;

/// Errors from registry operations.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("no such interface: {0}")]
    NotFound(u32),

    #[error("interface table exhausted ({0} entries)")]
    Exhausted(usize),

    #[error("interface name {0:?} already in use")]
    NameInUse(String),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Rejections from [`crate::engine::TransmitEngine::transmit`].
///
/// `Busy` and `Closed` hand the frame back so a blocking caller can
/// retry without rebuilding it.
#[derive(Debug, thiserror::Error)]
pub enum TransmitError {
    #[error("transmit slot occupied")]
    Busy(PacketBuffer),

    #[error("transmit engine closed")]
    Closed(PacketBuffer),

    #[error("frame of {len} bytes exceeds interface mtu {mtu}")]
    Oversize { len: usize, mtu: usize },
}
