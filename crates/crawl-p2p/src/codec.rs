//! Frame codec for `tokio_util::codec::Framed`.
//!
//! Splits the byte stream into `Frame`s using the 14-byte header from
//! `crawl_core::wire`. Payload interpretation happens later, in
//! `Message::decode`.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use zerocopy::{AsBytes, FromBytes};

use crawl_core::wire::{FrameHeader, HEADER_SIZE};
use crawl_core::Frame;

use crate::transport::TransportError;

#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl FrameCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        // Parse header without consuming
        let header = match FrameHeader::read_from(&src[..HEADER_SIZE]) {
            Some(header) => header,
            None => return Ok(None),
        };
        header.validate()?;

        let length = header.length.get() as usize;
        let total_size = HEADER_SIZE + length;
        if src.len() < total_size {
            src.reserve(total_size - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(length).freeze();
        header.verify(&payload)?;

        Ok(Some(Frame {
            code: header.code.get(),
            payload,
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = TransportError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let header = FrameHeader::for_payload(item.code, &item.payload)?;
        dst.reserve(HEADER_SIZE + item.payload.len());
        dst.put_slice(header.as_bytes());
        dst.put_slice(&item.payload);
        Ok(())
    }
}
