//! Socket address record for the LoRa family.
//!
//! Eight bytes on the wire: a big-endian `u16` family tag, two
//! reserved zero bytes, and the big-endian `u32` interface index.
//! There are no hardware address bytes; the radio link has none.

/// Address family tag carried in every encoded address.
pub const AF_LORA: u16 = 28;

/// Encoded size of a [`LoraAddr`].
pub const ADDR_LEN: usize = 8;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AddrError {
    #[error("address record too short: {0} bytes (need {ADDR_LEN})")]
    TooShort(usize),

    #[error("not a LoRa address (family {0})")]
    WrongFamily(u16),
}

/// An application-visible LoRa endpoint address: just an interface
/// index. Index 0 is the wildcard ("any/no interface").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct LoraAddr {
    pub ifindex: u32,
}

impl LoraAddr {
    pub const ANY: LoraAddr = LoraAddr { ifindex: 0 };

    pub fn new(ifindex: u32) -> Self {
        Self { ifindex }
    }

    pub fn is_any(&self) -> bool {
        self.ifindex == 0
    }

    pub fn encode(&self) -> [u8; ADDR_LEN] {
        let mut record = [0u8; ADDR_LEN];
        record[..2].copy_from_slice(&AF_LORA.to_be_bytes());
        record[4..].copy_from_slice(&self.ifindex.to_be_bytes());
        record
    }

    pub fn decode(record: &[u8]) -> Result<Self, AddrError> {
        if record.len() < ADDR_LEN {
            return Err(AddrError::TooShort(record.len()));
        }

        let family = u16::from_be_bytes([record[0], record[1]]);
        if family != AF_LORA {
            return Err(AddrError::WrongFamily(family));
        }

        let ifindex = u32::from_be_bytes([record[4], record[5], record[6], record[7]]);
        Ok(Self { ifindex })
    }
}
