//! `tokio_util::codec` adapter over the frame parser.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{encode_frame, Frame};
use crate::error::{FrameError, Result};
use crate::parser::{Advance, FrameParser};

/// Frame codec for `FramedRead` / `FramedWrite` over an async byte stream.
#[derive(Debug, Default)]
pub struct UsbFrameCodec {
    parser: FrameParser,
}

impl UsbFrameCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for UsbFrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        let Advance { consumed, frame } = self.parser.advance(&src[..])?;
        src.advance(consumed);
        Ok(frame)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if self.parser.is_idle() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl Encoder<Frame> for UsbFrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        encode_frame(item.command, item.process_id, item.arg, &item.payload, dst)
    }
}
