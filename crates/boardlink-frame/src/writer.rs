use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use tracing::trace;

use crate::channel::ChannelKind;
use crate::codec::{encode_frame, Frame, FrameConfig, HEADER_SIZE, MAX_PAYLOAD};
use crate::command::Command;
use crate::error::{FrameError, Result};

/// Writes complete frames to any `Write` stream.
///
/// Every frame is handed to the stream as one contiguous buffer, so payload
/// bytes of two frames never interleave as long as this writer is the only
/// one touching the stream.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
    bytes_written: u64,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(HEADER_SIZE + MAX_PAYLOAD),
            config,
            bytes_written: 0,
        }
    }

    /// Write a complete frame (blocking).
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.send(
            frame.command,
            frame.process_id,
            frame.arg,
            frame.payload.as_ref(),
        )
    }

    /// Encode and send one frame. The payload must fit in a single frame.
    pub fn send(
        &mut self,
        command: Command,
        process_id: u8,
        arg: u8,
        payload: &[u8],
    ) -> Result<()> {
        self.buf.clear();
        encode_frame(command, process_id, arg, payload, &mut self.buf)?;
        trace!(
            %command,
            process_id,
            arg,
            len = payload.len(),
            "sending frame"
        );
        let encoded = self.buf.split().freeze();
        self.write_all_retrying(&encoded)?;
        self.flush()
    }

    /// Send bytes that already form one or more whole frames, such as the
    /// output of the convenience encoders in [`crate::codec`].
    pub fn send_encoded(&mut self, encoded: &[u8]) -> Result<()> {
        self.write_all_retrying(encoded)?;
        self.flush()
    }

    /// Send `data` on `channel` as a run of write frames.
    ///
    /// Chunks are as large as the configuration allows (at most 255 bytes),
    /// filled greedily in byte order. Returns the number of frames sent; an
    /// empty `data` sends nothing.
    pub fn write_chunked(
        &mut self,
        channel: ChannelKind,
        process_id: u8,
        data: &[u8],
    ) -> Result<usize> {
        let command = channel.write_command();
        let mut frames = 0;
        for chunk in data.chunks(self.config.effective_chunk_size()) {
            self.send(command, process_id, 0, chunk)?;
            frames += 1;
        }
        Ok(frames)
    }

    fn write_all_retrying(&mut self, bytes: &[u8]) -> Result<()> {
        let mut offset = 0usize;
        while offset < bytes.len() {
            match self.inner.write(&bytes[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Total bytes handed to the stream so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}
