use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use super::{Frame, FrameHeader, HEADER_SIZE};
use crate::error::FrameError;

/// Splits a byte stream into [`Frame`]s via `tokio_util::codec`.
///
/// All validation (magic, version, message type, payload cap) happens in
/// [`FrameHeader::decode`]; the codec itself only tracks how far through a
/// frame the stream has gotten. A header decoded ahead of its payload is
/// parked in `pending` so it is not re-parsed on the next read.
#[derive(Debug, Default)]
pub struct FrameCodec {
    pending: Option<FrameHeader>,
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        let header = match self.pending.take() {
            Some(header) => header,
            None => match FrameHeader::decode(src)? {
                Some(header) => header,
                None => return Ok(None),
            },
        };

        let want = header.payload_len as usize;
        if src.len() < want {
            src.reserve(want - src.len());
            self.pending = Some(header);
            return Ok(None);
        }

        let payload = src.split_to(want).freeze();
        Ok(Some(Frame { header, payload }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        dst.reserve(HEADER_SIZE + frame.payload.len());
        frame.header.encode(dst);
        dst.extend_from_slice(&frame.payload);
        Ok(())
    }
}
