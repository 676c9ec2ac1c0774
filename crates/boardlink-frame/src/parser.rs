//! Incremental frame parser.
//!
//! Bytes arrive from the transport in chunks whose boundaries mean nothing:
//! one chunk may hold several frames, and one frame (even one header) may be
//! spread across several chunks. The parser is an explicit state machine
//! that holds at most one partially received frame at a time.

use bytes::BytesMut;
use tracing::{trace, warn};

use crate::codec::{Frame, FrameHeader, HEADER_SIZE};
use crate::error::Result;

/// Observable parser state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// No frame in flight.
    Ready,
    /// Some, but not all, header bytes received.
    HeaderFilling,
    /// All four header bytes received; decoded without waiting for input.
    HeaderComplete,
    /// Header decoded, some payload bytes still missing.
    PayloadFilling,
    /// All payload bytes received; emitted without waiting for input.
    PayloadComplete,
}

#[derive(Debug, Clone, Copy)]
enum State {
    Ready,
    HeaderFilling,
    HeaderComplete,
    PayloadFilling(FrameHeader),
    PayloadComplete(FrameHeader),
}

/// Result of one [`FrameParser::advance`] step.
#[derive(Debug)]
pub struct Advance {
    /// Input bytes consumed by this step.
    pub consumed: usize,
    /// The frame completed by this step, if any.
    pub frame: Option<Frame>,
}

/// Turns an arbitrarily chunked byte stream into complete frames.
///
/// One parser belongs to exactly one transport connection.
#[derive(Debug)]
pub struct FrameParser {
    state: State,
    header: [u8; HEADER_SIZE],
    cursor: usize,
    payload: BytesMut,
    frames_parsed: u64,
}

impl FrameParser {
    pub fn new() -> Self {
        Self {
            state: State::Ready,
            header: [0; HEADER_SIZE],
            cursor: 0,
            payload: BytesMut::new(),
            frames_parsed: 0,
        }
    }

    /// Current state of the machine.
    pub fn state(&self) -> ParserState {
        match self.state {
            State::Ready => ParserState::Ready,
            State::HeaderFilling => ParserState::HeaderFilling,
            State::HeaderComplete => ParserState::HeaderComplete,
            State::PayloadFilling(_) => ParserState::PayloadFilling,
            State::PayloadComplete(_) => ParserState::PayloadComplete,
        }
    }

    /// Returns true if no partial frame is buffered.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::Ready)
    }

    /// Number of bytes of the in-flight frame received so far.
    pub fn buffered(&self) -> usize {
        match self.state {
            State::Ready => 0,
            State::HeaderFilling | State::HeaderComplete => self.cursor,
            State::PayloadFilling(_) | State::PayloadComplete(_) => HEADER_SIZE + self.cursor,
        }
    }

    /// Total frames emitted since creation.
    pub fn frames_parsed(&self) -> u64 {
        self.frames_parsed
    }

    /// Drop any partial frame and return to `Ready`.
    pub fn reset(&mut self) {
        self.state = State::Ready;
        self.header = [0; HEADER_SIZE];
        self.cursor = 0;
        self.payload = BytesMut::new();
    }

    /// Consume input up to and including the end of the next complete frame.
    ///
    /// Stops early when `data` runs out. An unknown command byte resets the
    /// parser and is returned as an error; the stream cannot be resynchronized
    /// after that, so the caller should tear the connection down.
    pub fn advance(&mut self, data: &[u8]) -> Result<Advance> {
        let mut consumed = 0;
        loop {
            match self.state {
                State::Ready => {
                    let Some(&byte) = data.get(consumed) else {
                        return Ok(Advance {
                            consumed,
                            frame: None,
                        });
                    };
                    self.header[0] = byte;
                    self.cursor = 1;
                    consumed += 1;
                    self.state = State::HeaderFilling;
                }
                State::HeaderFilling => {
                    let rest = &data[consumed..];
                    if rest.is_empty() {
                        return Ok(Advance {
                            consumed,
                            frame: None,
                        });
                    }
                    let take = (HEADER_SIZE - self.cursor).min(rest.len());
                    self.header[self.cursor..self.cursor + take].copy_from_slice(&rest[..take]);
                    self.cursor += take;
                    consumed += take;
                    if self.cursor == HEADER_SIZE {
                        self.state = State::HeaderComplete;
                    }
                }
                State::HeaderComplete => {
                    let header = match FrameHeader::from_bytes(self.header) {
                        Ok(header) => header,
                        Err(err) => {
                            warn!(header = ?self.header, "unrecognized frame header");
                            self.reset();
                            return Err(err);
                        }
                    };
                    self.cursor = 0;
                    if header.length == 0 {
                        self.reset();
                        return Ok(Advance {
                            consumed,
                            frame: Some(self.emit(header, BytesMut::new())),
                        });
                    }
                    self.payload = BytesMut::with_capacity(usize::from(header.length));
                    self.state = State::PayloadFilling(header);
                }
                State::PayloadFilling(header) => {
                    let rest = &data[consumed..];
                    if rest.is_empty() {
                        return Ok(Advance {
                            consumed,
                            frame: None,
                        });
                    }
                    let take = (usize::from(header.length) - self.cursor).min(rest.len());
                    self.payload.extend_from_slice(&rest[..take]);
                    self.cursor += take;
                    consumed += take;
                    if self.cursor == usize::from(header.length) {
                        self.state = State::PayloadComplete(header);
                    }
                }
                State::PayloadComplete(header) => {
                    let payload = std::mem::take(&mut self.payload);
                    self.reset();
                    return Ok(Advance {
                        consumed,
                        frame: Some(self.emit(header, payload)),
                    });
                }
            }
        }
    }

    /// Consume all of `data`, calling `on_frame` for every frame completed,
    /// in arrival order.
    ///
    /// Frames completed before a protocol violation are still delivered.
    pub fn feed_with<F>(&mut self, mut data: &[u8], mut on_frame: F) -> Result<()>
    where
        F: FnMut(Frame),
    {
        loop {
            let Advance { consumed, frame } = self.advance(data)?;
            data = &data[consumed..];
            match frame {
                Some(frame) => on_frame(frame),
                None => return Ok(()),
            }
        }
    }

    /// Consume all of `data` and collect the completed frames.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        self.feed_with(data, |frame| frames.push(frame))?;
        Ok(frames)
    }

    fn emit(&mut self, header: FrameHeader, payload: BytesMut) -> Frame {
        self.frames_parsed += 1;
        trace!(
            command = %header.command,
            process_id = header.process_id,
            arg = header.arg,
            len = header.length,
            "frame parsed"
        );
        Frame::new(header.command, header.process_id, header.arg, payload.freeze())
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}
