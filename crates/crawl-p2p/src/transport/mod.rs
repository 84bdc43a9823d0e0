//! Minimal transport: plaintext TCP, framed, with a hello exchange that
//! tells each side the other's public key, client name and capabilities.
//!
//! The transport knows nothing about the opera protocol. It hands each
//! established connection to the `ProtocolHandler` registered for the
//! negotiated capability and tears the connection down afterwards.

pub mod hello;
pub mod server;

use std::fmt;

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crawl_core::forkid::EnrEntry;
use crawl_core::wire::{codes, WireError};
use crawl_core::{Frame, Node, NodeId};

use crate::codec::FrameCodec;

pub use server::{Server, ServerConfig};

// ── Disconnect reasons ────────────────────────────────────────────────────────

/// Reason sent with a disconnect frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscReason {
    Requested,
    NetworkError,
    ProtocolError,
    UselessPeer,
    TooManyPeers,
    AlreadyConnected,
    IncompatibleVersion,
    InvalidIdentity,
    Quitting,
    UnexpectedIdentity,
    SelfConnect,
    ReadTimeout,
    SubprotocolError,
}

impl DiscReason {
    pub fn code(&self) -> u8 {
        match self {
            Self::Requested => 0x00,
            Self::NetworkError => 0x01,
            Self::ProtocolError => 0x02,
            Self::UselessPeer => 0x03,
            Self::TooManyPeers => 0x04,
            Self::AlreadyConnected => 0x05,
            Self::IncompatibleVersion => 0x06,
            Self::InvalidIdentity => 0x07,
            Self::Quitting => 0x08,
            Self::UnexpectedIdentity => 0x09,
            Self::SelfConnect => 0x0a,
            Self::ReadTimeout => 0x0b,
            Self::SubprotocolError => 0x10,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        let reason = match code {
            0x00 => Self::Requested,
            0x01 => Self::NetworkError,
            0x02 => Self::ProtocolError,
            0x03 => Self::UselessPeer,
            0x04 => Self::TooManyPeers,
            0x05 => Self::AlreadyConnected,
            0x06 => Self::IncompatibleVersion,
            0x07 => Self::InvalidIdentity,
            0x08 => Self::Quitting,
            0x09 => Self::UnexpectedIdentity,
            0x0a => Self::SelfConnect,
            0x0b => Self::ReadTimeout,
            0x10 => Self::SubprotocolError,
            _ => return None,
        };
        Some(reason)
    }
}

impl fmt::Display for DiscReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Requested => "disconnect requested",
            Self::NetworkError => "network error",
            Self::ProtocolError => "breach of protocol",
            Self::UselessPeer => "useless peer",
            Self::TooManyPeers => "too many peers",
            Self::AlreadyConnected => "already connected",
            Self::IncompatibleVersion => "incompatible p2p protocol version",
            Self::InvalidIdentity => "invalid node identity",
            Self::Quitting => "client quitting",
            Self::UnexpectedIdentity => "unexpected identity",
            Self::SelfConnect => "connected to self",
            Self::ReadTimeout => "read timeout",
            Self::SubprotocolError => "subprotocol error",
        };
        f.write_str(s)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("wire: {0}")]
    Wire(#[from] WireError),

    #[error("remote disconnected: {0}")]
    Disconnected(DiscReason),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("timed out")]
    Timeout,

    #[error("unexpected message code {0:#x}")]
    UnexpectedCode(u16),

    #[error("bad hello: {0}")]
    BadHello(String),

    #[error("remote identity does not match dialled node")]
    UnexpectedIdentity,
}

// ── Peers ─────────────────────────────────────────────────────────────────────

/// A protocol capability advertised in the hello.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cap {
    pub name: String,
    pub version: u32,
}

impl fmt::Display for Cap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}

/// The remote end of an established connection, as seen by a protocol.
#[derive(Debug, Clone)]
pub struct RemotePeer {
    pub node: Node,
    /// Client name from the hello.
    pub name: String,
    pub caps: Vec<Cap>,
    /// Protocol version negotiated for this connection.
    pub version: u32,
    pub trusted: bool,
    pub inbound: bool,
}

impl RemotePeer {
    pub fn id(&self) -> NodeId {
        self.node.id()
    }
}

// ── Message stream ────────────────────────────────────────────────────────────

pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

/// Framed read/write access to one connection.
pub struct MsgStream {
    framed: Framed<Box<dyn AsyncStream>, FrameCodec>,
}

impl MsgStream {
    pub fn new<S: AsyncStream + 'static>(io: S) -> Self {
        Self {
            framed: Framed::new(Box::new(io), FrameCodec::new()),
        }
    }

    /// Next frame from the remote. A disconnect frame surfaces as
    /// `TransportError::Disconnected`.
    pub async fn read_frame(&mut self) -> Result<Frame, TransportError> {
        match self.framed.next().await {
            None => Err(TransportError::ConnectionClosed),
            Some(Err(e)) => Err(e),
            Some(Ok(frame)) if frame.code == codes::DISCONNECT => {
                let reason = frame
                    .payload
                    .first()
                    .and_then(|c| DiscReason::from_code(*c))
                    .unwrap_or(DiscReason::Requested);
                Err(TransportError::Disconnected(reason))
            }
            Some(Ok(frame)) => Ok(frame),
        }
    }

    pub async fn write_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.framed.send(frame).await
    }

    /// Send a disconnect frame. Best effort: the connection is going away
    /// regardless.
    pub async fn disconnect(&mut self, reason: DiscReason) {
        let frame = Frame::new(codes::DISCONNECT, vec![reason.code()]);
        if let Err(e) = self.framed.send(frame).await {
            tracing::trace!(error = %e, "disconnect frame not delivered");
        }
    }
}

// ── Protocols ─────────────────────────────────────────────────────────────────

/// Runs a protocol over an established connection. Returns the reason the
/// session ended, which the transport sends to the remote.
pub trait ProtocolHandler: Send + Sync + 'static {
    fn run<'a>(&'a self, peer: RemotePeer, stream: &'a mut MsgStream) -> BoxFuture<'a, DiscReason>;
}

/// One protocol version the server will offer.
#[derive(Clone)]
pub struct Protocol {
    pub name: String,
    pub version: u32,
    /// Number of message codes the version uses.
    pub length: u16,
    pub handler: std::sync::Arc<dyn ProtocolHandler>,
    /// Discovery record entries published for this protocol.
    pub attributes: Vec<EnrEntry>,
}

impl Protocol {
    pub fn cap(&self) -> Cap {
        Cap {
            name: self.name.clone(),
            version: self.version,
        }
    }
}

impl fmt::Debug for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Protocol")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}
