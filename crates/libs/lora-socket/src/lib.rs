//! Datagram socket layer over `lora-dev` radio interfaces.
//!
//! Applications open a [`LoraSocket`] from a [`LoraStack`], bind it to
//! one interface by index (or to the wildcard), and send fixed-MTU
//! datagrams. Interface removal and link drops are observed through
//! the device layer's lifecycle notifier and surface as sticky errors
//! on the next socket operation, never as a panic on the notifying
//! thread.

pub mod addr;
pub mod error;
pub mod socket;

pub use addr::{AddrError, LoraAddr, AF_LORA};
pub use error::SocketError;
pub use socket::{Datagram, LoraSocket, LoraStack, SendOptions, SocketConfig};
