//! Device layer of the LoRa datagram stack.
//!
//! Transceiver drivers register here as named radio interfaces; the
//! socket layer resolves interfaces by index and hands frames to each
//! interface's transmit engine. Interface lifecycle (registration,
//! removal, link state) fans out through the [`event::LifecycleNotifier`]
//! so endpoints never hold a live reference to an interface that may be
//! torn down underneath them.

pub mod buffer;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod registry;
pub mod transceiver;

pub use buffer::PacketBuffer;
pub use config::DeviceConfig;
pub use engine::TransmitEngine;
pub use error::{DeviceError, TransmitError};
pub use event::{LifecycleEvent, LifecycleNotifier, LinkChange, SubscriptionId};
pub use registry::{
    DeviceRegistry, FrameSink, HardwareKind, Interface, LinkStats, LinkStatsSnapshot,
};
pub use transceiver::{DriverError, IrqFlags, OpMode, Transceiver};

/// Smallest maximum payload a LoRa link is guaranteed to carry, in
/// bytes. Interfaces registered without an explicit MTU default to it.
pub const LORA_MTU: usize = 36;
