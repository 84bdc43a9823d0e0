//! Hello exchange: the first frame in each direction on a new connection.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crawl_core::wire::{codes, HANDSHAKE_TIMEOUT_SECS};
use crawl_core::Frame;

use super::{Cap, MsgStream, TransportError};

/// Transport protocol version.
pub const P2P_VERSION: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub p2p_version: u32,
    pub name: String,
    pub caps: Vec<Cap>,
    #[serde(with = "hex::serde")]
    pub pubkey: [u8; 32],
    /// Port the sender accepts connections on. 0 = not listening.
    pub listen_port: u16,
}

impl Hello {
    pub fn to_frame(&self) -> Result<Frame, TransportError> {
        let payload = serde_json::to_vec(self).map_err(|e| TransportError::BadHello(e.to_string()))?;
        Ok(Frame::new(codes::HELLO, payload))
    }

    pub fn from_frame(frame: &Frame) -> Result<Self, TransportError> {
        if frame.code != codes::HELLO {
            return Err(TransportError::UnexpectedCode(frame.code));
        }
        serde_json::from_slice(&frame.payload).map_err(|e| TransportError::BadHello(e.to_string()))
    }
}

/// Send our hello and read theirs, within the handshake timeout.
pub async fn exchange(stream: &mut MsgStream, ours: &Hello) -> Result<Hello, TransportError> {
    let timeout = Duration::from_secs(HANDSHAKE_TIMEOUT_SECS);
    let work = async {
        stream.write_frame(ours.to_frame()?).await?;
        let frame = stream.read_frame().await?;
        Hello::from_frame(&frame)
    };
    tokio::time::timeout(timeout, work)
        .await
        .map_err(|_| TransportError::Timeout)?
}

/// Highest version of `name` that both sides support.
pub fn negotiate(ours: &[Cap], theirs: &[Cap], name: &str) -> Option<u32> {
    ours.iter()
        .filter(|c| c.name == name)
        .filter(|c| theirs.contains(c))
        .map(|c| c.version)
        .max()
}
