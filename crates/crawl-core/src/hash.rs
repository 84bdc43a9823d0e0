//! Hash types carried by the peer protocol.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A plain 32-byte hash (genesis id, block hash).
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// An event id. The id itself encodes where the event sits in the DAG:
///
///   bytes 0..4   epoch, big-endian
///   bytes 4..8   lamport time, big-endian
///   bytes 8..32  hash suffix
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EventHash(pub [u8; 32]);

impl EventHash {
    /// Assemble an id from its epoch, lamport time and hash suffix.
    pub fn new(epoch: u32, lamport: u32, suffix: [u8; 24]) -> Self {
        let mut bytes = [0u8; 32];
        bytes[0..4].copy_from_slice(&epoch.to_be_bytes());
        bytes[4..8].copy_from_slice(&lamport.to_be_bytes());
        bytes[8..].copy_from_slice(&suffix);
        Self(bytes)
    }

    /// Epoch the event belongs to.
    pub fn epoch(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    /// Lamport time of the event.
    pub fn lamport(&self) -> u32 {
        u32::from_be_bytes([self.0[4], self.0[5], self.0[6], self.0[7]])
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for EventHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.epoch(),
            self.lamport(),
            hex::encode(&self.0[8..11])
        )
    }
}

impl fmt::Debug for EventHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

// Both hashes travel as "0x"-prefixed hex strings.
macro_rules! hex_serde {
    ($ty:ident) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                let s = s.strip_prefix("0x").unwrap_or(&s);
                let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
                let arr = <[u8; 32]>::try_from(bytes.as_slice())
                    .map_err(|_| serde::de::Error::invalid_length(bytes.len(), &"32 bytes"))?;
                Ok($ty(arr))
            }
        }
    };
}

hex_serde!(Hash);
hex_serde!(EventHash);
