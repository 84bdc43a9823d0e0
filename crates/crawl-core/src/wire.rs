//! Crawler wire format: framing shared by the transport and the peer protocol.
//!
//! Every message on a connection is a fixed 14-byte header followed by its
//! payload. The header is a zerocopy type with explicit network byte order,
//! so a frame can be described and size-checked before a single payload
//! byte is read. There is no unsafe code in this module.
//!
//! ```text
//! +----------+--------+----------+----------+
//! |  Magic   |  Code  |  Length  | Checksum |
//! | 4 bytes  | 2 bytes| 4 bytes  | 4 bytes  |
//! +----------+--------+----------+----------+
//! |             Payload (Length)            |
//! +-----------------------------------------+
//! ```

use bytes::Bytes;
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{NetworkEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

// ── Frame Header ─────────────────────────────────────────────────────────────

/// Header preceding every frame on the wire.
///
/// Wire size: 14 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct FrameHeader {
    /// Always `MAGIC`. Anything else means the remote is not speaking this protocol.
    pub magic: [u8; 4],

    /// Message code. Transport codes live above `TRANSPORT_CODE_BASE`,
    /// protocol codes below it.
    pub code: U16<NetworkEndian>,

    /// Payload length in bytes, not including this header.
    pub length: U32<NetworkEndian>,

    /// First four bytes of BLAKE3(payload).
    pub checksum: [u8; 4],
}

assert_eq_size!(FrameHeader, [u8; 14]);

impl FrameHeader {
    /// Build the header for a payload.
    pub fn for_payload(code: u16, payload: &[u8]) -> Result<Self, WireError> {
        if payload.len() > MAX_FRAME_SIZE {
            return Err(WireError::FrameTooLarge {
                size: payload.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        Ok(Self {
            magic: MAGIC,
            code: U16::new(code),
            length: U32::new(payload.len() as u32),
            checksum: checksum(payload),
        })
    }

    /// Check the parts of the header that can be checked without the payload.
    pub fn validate(&self) -> Result<(), WireError> {
        if self.magic != MAGIC {
            return Err(WireError::BadMagic(self.magic));
        }
        let length = self.length.get() as usize;
        if length > MAX_FRAME_SIZE {
            return Err(WireError::FrameTooLarge {
                size: length,
                max: MAX_FRAME_SIZE,
            });
        }
        Ok(())
    }

    /// Verify the payload against the header checksum.
    pub fn verify(&self, payload: &[u8]) -> Result<(), WireError> {
        if checksum(payload) != self.checksum {
            return Err(WireError::ChecksumMismatch);
        }
        Ok(())
    }
}

/// First four bytes of BLAKE3(payload).
pub fn checksum(payload: &[u8]) -> [u8; 4] {
    let digest = blake3::hash(payload);
    let mut out = [0u8; 4];
    out.copy_from_slice(&digest.as_bytes()[..4]);
    out
}

// ── Frame ─────────────────────────────────────────────────────────────────────

/// A decoded frame: code plus raw payload. Interpretation of the payload is
/// left to `message::Message::decode`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub code: u16,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(code: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            code,
            payload: payload.into(),
        }
    }

    /// Encoded payload size, as used for protocol size limits.
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

// ── Protocol ──────────────────────────────────────────────────────────────────

/// Name of the peer protocol, advertised as a capability in the hello.
pub const PROTOCOL_NAME: &str = "opera";

pub const FTM62: u32 = 62;
pub const FTM63: u32 = 63;

/// Supported protocol versions, most preferred first.
pub const PROTOCOL_VERSIONS: [u32; 2] = [FTM63, FTM62];

/// Number of message codes implemented by a protocol version.
/// FTM62 stops at EventsStreamResponse, FTM63 adds the BV/BR/EP streams.
pub fn protocol_length(version: u32) -> Option<u16> {
    match version {
        FTM62 => Some(codes::EVENTS_STREAM_RESPONSE + 1),
        FTM63 => Some(codes::EPS_STREAM_RESPONSE + 1),
        _ => None,
    }
}

/// Protocol message codes.
pub mod codes {
    pub const HANDSHAKE: u16 = 0;
    pub const PROGRESS: u16 = 1;
    pub const EVM_TXS: u16 = 2;
    pub const NEW_EVM_TX_HASHES: u16 = 3;
    pub const GET_EVM_TXS: u16 = 4;
    pub const NEW_EVENT_IDS: u16 = 5;
    pub const GET_EVENTS: u16 = 6;
    pub const EVENTS: u16 = 7;
    pub const REQUEST_EVENTS_STREAM: u16 = 8;
    pub const EVENTS_STREAM_RESPONSE: u16 = 9;
    pub const REQUEST_BVS_STREAM: u16 = 10;
    pub const BVS_STREAM_RESPONSE: u16 = 11;
    pub const REQUEST_BRS_STREAM: u16 = 12;
    pub const BRS_STREAM_RESPONSE: u16 = 13;
    pub const REQUEST_EPS_STREAM: u16 = 14;
    pub const EPS_STREAM_RESPONSE: u16 = 15;

    /// First code owned by the transport. Protocol codes never reach it.
    pub const TRANSPORT_CODE_BASE: u16 = 0x8000;
    pub const HELLO: u16 = TRANSPORT_CODE_BASE;
    pub const DISCONNECT: u16 = TRANSPORT_CODE_BASE + 1;
}

// ── Constants ─────────────────────────────────────────────────────────────────

/// Frame magic: "FTM" plus framing version 1.
pub const MAGIC: [u8; 4] = *b"FTM\x01";

/// Header size in bytes.
pub const HEADER_SIZE: usize = std::mem::size_of::<FrameHeader>();

/// Largest frame the transport will buffer.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Largest message the peer protocol accepts, checked before the code is looked at.
pub const PROTOCOL_MAX_MSG_SIZE: usize = 10 * 1024 * 1024;

/// Hard cap on the number of items in one batch message.
pub const HARD_LIMIT_ITEMS: usize = 4000;

/// Status exchange and hello exchange timeout in seconds.
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 5;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("bad frame magic: {}", hex::encode(.0))]
    BadMagic([u8; 4]),

    #[error("frame length {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("frame checksum mismatch")]
    ChecksumMismatch,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
