//! Owned frame buffers handed from the socket layer to a transmit
//! engine.
//!
//! The metadata travels in plain fields next to the payload instead of
//! a reserved header region inside the allocation; the originating
//! interface index is stamped by the sender and read back by the
//! engine on completion.

/// A single outbound (or echoed) frame.
///
/// Ownership transfers fully into the transmit engine on submission;
/// the engine alone drops or echoes the buffer afterwards.
#[derive(Debug, Clone)]
pub struct PacketBuffer {
    data: Vec<u8>,
    ifindex: u32,
    loopback: bool,
}

impl PacketBuffer {
    /// Copies `payload` into a fresh buffer with empty metadata.
    pub fn new(payload: &[u8]) -> Self {
        Self::from_vec(payload.to_vec())
    }

    /// Takes ownership of an already-built payload.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data, ifindex: 0, loopback: false }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn payload(&self) -> &[u8] {
        &self.data
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.data
    }

    /// Interface this frame was produced for, 0 when unstamped.
    pub fn ifindex(&self) -> u32 {
        self.ifindex
    }

    pub fn set_ifindex(&mut self, ifindex: u32) {
        self.ifindex = ifindex;
    }

    /// Self-addressed test frames are echoed back through the receive
    /// path on transmit completion instead of being dropped.
    pub fn is_loopback(&self) -> bool {
        self.loopback
    }

    pub fn set_loopback(&mut self, loopback: bool) {
        self.loopback = loopback;
    }
}
