//! Inbound message state machine.
//!
//! Each message is size-checked and decoded, then may move the session
//! towards a terminal classification. Any error ends the session.

use crawl_core::message::check_size;
use crawl_core::wire::codes;
use crawl_core::{ErrorCode, Frame, Message, ProtocolError};
use crawl_services::{PeerSession, PeerStatus};

/// Handle one inbound frame for `session`, whose negotiated version
/// implements `length` message codes.
pub(crate) fn handle_msg(
    session: &PeerSession,
    frame: &Frame,
    length: u16,
) -> Result<(), ProtocolError> {
    check_size(frame)?;
    if frame.code == codes::HANDSHAKE {
        return Err(extra_status());
    }

    match Message::decode(frame, length)? {
        Message::Handshake(_) => return Err(extra_status()),

        Message::Progress(progress) => {
            session.set_progress(progress);
            tracing::info!(
                target: "crawl::progress",
                node = %session.node.url(),
                epoch = progress.epoch,
                block = progress.last_block_idx,
                atropos = %progress.last_block_atropos,
                name = %session.name,
                "peer progress"
            );
            // A peer claiming an epoch beyond the one its own head belongs
            // to contradicts itself.
            let status = if progress.epoch > progress.last_block_atropos.epoch() {
                PeerStatus::Evil
            } else {
                PeerStatus::Useless
            };
            session.set_status(status);
        }

        Message::EvmTxs | Message::NewEvmTxHashes | Message::GetEvmTxs => {}

        Message::NewEventIds(ids) => {
            tracing::info!(peer = %session.id.short(), count = ids.len(), "event ids announced");
        }
        Message::GetEvents(ids) => {
            tracing::info!(peer = %session.id.short(), count = ids.len(), "events requested");
        }
        Message::Events(events) => {
            tracing::info!(peer = %session.id.short(), count = events.len(), "events received");
        }

        Message::EventsStreamResponse(chunk) => {
            if !chunk.events.is_empty() {
                tracing::info!(
                    peer = %session.id.short(),
                    session_id = chunk.session_id,
                    count = chunk.events.len(),
                    "streamed events received"
                );
                session.set_status(PeerStatus::Useless);
            }
        }

        Message::RequestEventsStream
        | Message::RequestBvsStream
        | Message::BvsStreamResponse
        | Message::RequestBrsStream
        | Message::BrsStreamResponse
        | Message::RequestEpsStream
        | Message::EpsStreamResponse => {}
    }
    Ok(())
}

fn extra_status() -> ProtocolError {
    ProtocolError::new(ErrorCode::ExtraStatusMsg, "uncontrolled status message")
}
