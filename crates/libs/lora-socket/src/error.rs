/// Socket-level failures, synchronous and sticky alike.
///
/// Synchronous misuse (bad target, oversize payload, unsupported
/// operation) comes back from the offending call. Asynchronous
/// conditions (`DeviceGone`, `LinkDown`) are recorded by the lifecycle
/// callback and surface on the next operation that can report them.
#[derive(Debug, Clone, Copy, thiserror::Error, PartialEq, Eq)]
pub enum SocketError {
    #[error("no such device")]
    NoSuchDevice,

    #[error("wrong hardware kind for this socket family")]
    WrongHardwareKind,

    #[error("operation not supported on LoRa sockets")]
    NotSupported,

    #[error("destination required")]
    DestinationRequired,

    #[error("message of {len} bytes exceeds interface mtu {mtu}")]
    MessageTooLarge { len: usize, mtu: usize },

    #[error("no route: interface {0} is gone")]
    NoRoute(u32),

    #[error("transmit would block")]
    WouldBlock,

    #[error("bound device was removed")]
    DeviceGone,

    #[error("network is down")]
    LinkDown,

    #[error("resource exhausted")]
    ResourceExhausted,
}
