//! Peer protocol messages.
//!
//! Each message code maps to exactly one `Message` variant. `Message::decode`
//! is the single place where size, code range, payload shape and batch
//! limits are enforced, so the session state machine only ever sees
//! well-formed messages.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::hash::{EventHash, Hash};
use crate::wire::{codes, Frame, HARD_LIMIT_ITEMS, PROTOCOL_MAX_MSG_SIZE};

// ── Codes ─────────────────────────────────────────────────────────────────────

/// Message code discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageCode {
    Handshake = codes::HANDSHAKE,
    Progress = codes::PROGRESS,
    EvmTxs = codes::EVM_TXS,
    NewEvmTxHashes = codes::NEW_EVM_TX_HASHES,
    GetEvmTxs = codes::GET_EVM_TXS,
    NewEventIds = codes::NEW_EVENT_IDS,
    GetEvents = codes::GET_EVENTS,
    Events = codes::EVENTS,
    RequestEventsStream = codes::REQUEST_EVENTS_STREAM,
    EventsStreamResponse = codes::EVENTS_STREAM_RESPONSE,
    RequestBvsStream = codes::REQUEST_BVS_STREAM,
    BvsStreamResponse = codes::BVS_STREAM_RESPONSE,
    RequestBrsStream = codes::REQUEST_BRS_STREAM,
    BrsStreamResponse = codes::BRS_STREAM_RESPONSE,
    RequestEpsStream = codes::REQUEST_EPS_STREAM,
    EpsStreamResponse = codes::EPS_STREAM_RESPONSE,
}

impl MessageCode {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            codes::HANDSHAKE => Some(Self::Handshake),
            codes::PROGRESS => Some(Self::Progress),
            codes::EVM_TXS => Some(Self::EvmTxs),
            codes::NEW_EVM_TX_HASHES => Some(Self::NewEvmTxHashes),
            codes::GET_EVM_TXS => Some(Self::GetEvmTxs),
            codes::NEW_EVENT_IDS => Some(Self::NewEventIds),
            codes::GET_EVENTS => Some(Self::GetEvents),
            codes::EVENTS => Some(Self::Events),
            codes::REQUEST_EVENTS_STREAM => Some(Self::RequestEventsStream),
            codes::EVENTS_STREAM_RESPONSE => Some(Self::EventsStreamResponse),
            codes::REQUEST_BVS_STREAM => Some(Self::RequestBvsStream),
            codes::BVS_STREAM_RESPONSE => Some(Self::BvsStreamResponse),
            codes::REQUEST_BRS_STREAM => Some(Self::RequestBrsStream),
            codes::BRS_STREAM_RESPONSE => Some(Self::BrsStreamResponse),
            codes::REQUEST_EPS_STREAM => Some(Self::RequestEpsStream),
            codes::EPS_STREAM_RESPONSE => Some(Self::EpsStreamResponse),
            _ => None,
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Protocol error kinds. Every one of them is fatal to the session that
/// produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    MsgTooLarge,
    Decode,
    InvalidMsgCode,
    ProtocolVersionMismatch,
    NetworkIdMismatch,
    GenesisMismatch,
    NoStatusMsg,
    ExtraStatusMsg,
    EmptyMessage,
    /// A stream chunk carried both ids and events, or neither.
    ChunkContents,
}

impl ErrorCode {
    /// Numeric code, as reported to the remote on disconnect.
    pub fn code(&self) -> u16 {
        match self {
            Self::MsgTooLarge => 0,
            Self::Decode => 1,
            Self::InvalidMsgCode => 2,
            Self::ProtocolVersionMismatch => 3,
            Self::NetworkIdMismatch => 4,
            Self::GenesisMismatch => 5,
            Self::NoStatusMsg => 6,
            Self::ExtraStatusMsg => 7,
            Self::EmptyMessage => 0xf00,
            Self::ChunkContents => 0xf01,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::MsgTooLarge => "Message too long",
            Self::Decode => "Invalid message",
            Self::InvalidMsgCode => "Invalid message code",
            Self::ProtocolVersionMismatch => "Protocol version mismatch",
            Self::NetworkIdMismatch => "NetworkId mismatch",
            Self::GenesisMismatch => "Genesis object mismatch",
            Self::NoStatusMsg => "No status message",
            Self::ExtraStatusMsg => "Extra status message",
            Self::EmptyMessage => "Empty message",
            Self::ChunkContents => "Inconsistent stream chunk",
        };
        f.write_str(s)
    }
}

/// A protocol violation by the remote peer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code} - {detail}")]
pub struct ProtocolError {
    pub code: ErrorCode,
    pub detail: String,
}

impl ProtocolError {
    pub fn new(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }
}

// ── Payloads ──────────────────────────────────────────────────────────────────

/// A peer's view of its own sync state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerProgress {
    pub epoch: u32,
    pub last_block_idx: u64,
    pub last_block_atropos: EventHash,
    #[serde(default)]
    pub highest_lamport: u32,
}

/// The status message exchanged once, first, on every session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub protocol_version: u32,
    pub network_id: u64,
    pub genesis: Hash,
    pub progress: PeerProgress,
}

/// Consensus header of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseEvent {
    pub id: EventHash,
    pub epoch: u32,
    pub seq: u32,
    pub frame: u32,
    pub creator: u32,
    pub lamport: u32,
    #[serde(default)]
    pub parents: Vec<EventHash>,
    #[serde(default)]
    pub creation_time: u64,
}

/// A full event as carried in event batches and stream responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPayload {
    #[serde(flatten)]
    pub base: BaseEvent,
    #[serde(default)]
    pub tx_hashes: Vec<Hash>,
}

/// One chunk of a streamed response. Carries either ids or full events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagChunk {
    pub session_id: u32,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub ids: Vec<EventHash>,
    #[serde(default)]
    pub events: Vec<EventPayload>,
}

// ── Message ───────────────────────────────────────────────────────────────────

/// A decoded protocol message. Transaction traffic and the block-vote,
/// block-record and epoch-pack streams are recognised but their payloads
/// are not interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Handshake(Status),
    Progress(PeerProgress),
    EvmTxs,
    NewEvmTxHashes,
    GetEvmTxs,
    NewEventIds(Vec<EventHash>),
    GetEvents(Vec<EventHash>),
    Events(Vec<EventPayload>),
    RequestEventsStream,
    EventsStreamResponse(DagChunk),
    RequestBvsStream,
    BvsStreamResponse,
    RequestBrsStream,
    BrsStreamResponse,
    RequestEpsStream,
    EpsStreamResponse,
}

impl Message {
    pub fn code(&self) -> MessageCode {
        match self {
            Self::Handshake(_) => MessageCode::Handshake,
            Self::Progress(_) => MessageCode::Progress,
            Self::EvmTxs => MessageCode::EvmTxs,
            Self::NewEvmTxHashes => MessageCode::NewEvmTxHashes,
            Self::GetEvmTxs => MessageCode::GetEvmTxs,
            Self::NewEventIds(_) => MessageCode::NewEventIds,
            Self::GetEvents(_) => MessageCode::GetEvents,
            Self::Events(_) => MessageCode::Events,
            Self::RequestEventsStream => MessageCode::RequestEventsStream,
            Self::EventsStreamResponse(_) => MessageCode::EventsStreamResponse,
            Self::RequestBvsStream => MessageCode::RequestBvsStream,
            Self::BvsStreamResponse => MessageCode::BvsStreamResponse,
            Self::RequestBrsStream => MessageCode::RequestBrsStream,
            Self::BrsStreamResponse => MessageCode::BrsStreamResponse,
            Self::RequestEpsStream => MessageCode::RequestEpsStream,
            Self::EpsStreamResponse => MessageCode::EpsStreamResponse,
        }
    }

    /// Decode a frame received on a session whose negotiated protocol
    /// version implements `protocol_length` codes.
    pub fn decode(frame: &Frame, protocol_length: u16) -> Result<Self, ProtocolError> {
        check_size(frame)?;

        if frame.code >= protocol_length {
            return Err(ProtocolError::new(
                ErrorCode::InvalidMsgCode,
                frame.code.to_string(),
            ));
        }
        let code = MessageCode::from_u16(frame.code).ok_or_else(|| {
            ProtocolError::new(ErrorCode::InvalidMsgCode, frame.code.to_string())
        })?;

        let msg = match code {
            MessageCode::Handshake => Self::Handshake(decode_json(frame)?),
            MessageCode::Progress => Self::Progress(decode_json(frame)?),
            MessageCode::EvmTxs => Self::EvmTxs,
            MessageCode::NewEvmTxHashes => Self::NewEvmTxHashes,
            MessageCode::GetEvmTxs => Self::GetEvmTxs,
            MessageCode::NewEventIds => {
                let ids: Vec<EventHash> = decode_json(frame)?;
                check_len_limits(ids.len(), "announced event ids")?;
                Self::NewEventIds(ids)
            }
            MessageCode::GetEvents => {
                let ids: Vec<EventHash> = decode_json(frame)?;
                check_len_limits(ids.len(), "requested event ids")?;
                Self::GetEvents(ids)
            }
            MessageCode::Events => {
                let events: Vec<EventPayload> = decode_json(frame)?;
                check_len_limits(events.len(), "events")?;
                Self::Events(events)
            }
            MessageCode::RequestEventsStream => Self::RequestEventsStream,
            MessageCode::EventsStreamResponse => {
                let chunk: DagChunk = decode_json(frame)?;
                check_chunk(&chunk)?;
                Self::EventsStreamResponse(chunk)
            }
            MessageCode::RequestBvsStream => Self::RequestBvsStream,
            MessageCode::BvsStreamResponse => Self::BvsStreamResponse,
            MessageCode::RequestBrsStream => Self::RequestBrsStream,
            MessageCode::BrsStreamResponse => Self::BrsStreamResponse,
            MessageCode::RequestEpsStream => Self::RequestEpsStream,
            MessageCode::EpsStreamResponse => Self::EpsStreamResponse,
        };
        Ok(msg)
    }

    /// Encode into a frame ready for the transport.
    pub fn encode(&self) -> Result<Frame, ProtocolError> {
        let payload = match self {
            Self::Handshake(status) => encode_json(status)?,
            Self::Progress(progress) => encode_json(progress)?,
            Self::NewEventIds(ids) | Self::GetEvents(ids) => encode_json(ids)?,
            Self::Events(events) => encode_json(events)?,
            Self::EventsStreamResponse(chunk) => encode_json(chunk)?,
            _ => Vec::new(),
        };
        Ok(Frame::new(self.code() as u16, payload))
    }
}

// ── Checks ────────────────────────────────────────────────────────────────────

/// Reject frames above the protocol size limit, whatever their code.
pub fn check_size(frame: &Frame) -> Result<(), ProtocolError> {
    if frame.size() > PROTOCOL_MAX_MSG_SIZE {
        return Err(ProtocolError::new(
            ErrorCode::MsgTooLarge,
            format!("{} > {}", frame.size(), PROTOCOL_MAX_MSG_SIZE),
        ));
    }
    Ok(())
}

/// Batches must be non-empty and at most `HARD_LIMIT_ITEMS` long.
pub fn check_len_limits(size: usize, what: &str) -> Result<(), ProtocolError> {
    if size == 0 {
        return Err(ProtocolError::new(ErrorCode::EmptyMessage, what));
    }
    if size > HARD_LIMIT_ITEMS {
        return Err(ProtocolError::new(
            ErrorCode::MsgTooLarge,
            format!("{size} {what} > {HARD_LIMIT_ITEMS}"),
        ));
    }
    Ok(())
}

fn check_chunk(chunk: &DagChunk) -> Result<(), ProtocolError> {
    match (chunk.ids.is_empty(), chunk.events.is_empty()) {
        (true, true) | (false, false) => Err(ProtocolError::new(
            ErrorCode::ChunkContents,
            "expected either events or event hashes",
        )),
        (false, true) => check_len_limits(chunk.ids.len(), "streamed event ids"),
        (true, false) => check_len_limits(chunk.events.len(), "streamed events"),
    }
}

fn decode_json<T: DeserializeOwned>(frame: &Frame) -> Result<T, ProtocolError> {
    if frame.payload.is_empty() {
        return Err(ProtocolError::new(
            ErrorCode::EmptyMessage,
            format!("code {}", frame.code),
        ));
    }
    serde_json::from_slice(&frame.payload).map_err(|e| {
        ProtocolError::new(
            ErrorCode::Decode,
            format!("code {} ({} bytes): {e}", frame.code, frame.size()),
        )
    })
}

fn encode_json<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(value).map_err(|e| ProtocolError::new(ErrorCode::Decode, e.to_string()))
}
