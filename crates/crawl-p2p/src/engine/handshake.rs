//! Status exchange.
//!
//! Both sides send a status first. The remote's must be the first frame it
//! sends and must agree with ours on genesis, network id and version.

use std::time::Duration;

use crawl_core::message::check_size;
use crawl_core::wire::{codes, protocol_length, HANDSHAKE_TIMEOUT_SECS};
use crawl_core::{ErrorCode, Frame, Message, ProtocolError, Status};

use super::{HandshakeInfo, SessionError};
use crate::transport::MsgStream;

/// Send our status and read the remote's, within the handshake timeout.
pub(crate) async fn exchange(
    info: &HandshakeInfo,
    stream: &mut MsgStream,
    version: u32,
) -> Result<Status, SessionError> {
    let ours = info.status(version);
    let work = async {
        stream.write_frame(Message::Handshake(ours).encode()?).await?;
        let frame = stream.read_frame().await?;
        read_status(info, &frame, version)
    };
    tokio::time::timeout(Duration::from_secs(HANDSHAKE_TIMEOUT_SECS), work)
        .await
        .map_err(|_| SessionError::HandshakeTimeout)?
}

/// Validate the remote's first frame as a status message.
pub(crate) fn read_status(
    info: &HandshakeInfo,
    frame: &Frame,
    version: u32,
) -> Result<Status, SessionError> {
    if frame.code != codes::HANDSHAKE {
        return Err(ProtocolError::new(
            ErrorCode::NoStatusMsg,
            format!("first msg has code {:#x} (!= {:#x})", frame.code, codes::HANDSHAKE),
        )
        .into());
    }
    check_size(frame)?;

    let length = protocol_length(version).ok_or_else(|| {
        ProtocolError::new(ErrorCode::ProtocolVersionMismatch, version.to_string())
    })?;
    let status = match Message::decode(frame, length)? {
        Message::Handshake(status) => status,
        other => {
            return Err(ProtocolError::new(ErrorCode::NoStatusMsg, format!("{:?}", other.code())).into())
        }
    };

    if status.genesis != info.genesis {
        return Err(ProtocolError::new(
            ErrorCode::GenesisMismatch,
            format!("{} (!= {})", status.genesis, info.genesis),
        )
        .into());
    }
    if status.network_id != info.network_id {
        return Err(ProtocolError::new(
            ErrorCode::NetworkIdMismatch,
            format!("{} (!= {})", status.network_id, info.network_id),
        )
        .into());
    }
    if status.protocol_version != version {
        return Err(ProtocolError::new(
            ErrorCode::ProtocolVersionMismatch,
            format!("{} (!= {})", status.protocol_version, version),
        )
        .into());
    }
    Ok(status)
}
