//! Framing for the boardlink USB protocol.
//!
//! Every frame starts with a fixed 4-byte header:
//! - command (one of a closed set of byte values)
//! - process id (0-255)
//! - a command-specific argument (exit code, signal, ...)
//! - payload length (0-255)
//!
//! followed by exactly `length` payload bytes. Many remote processes, each
//! with control/stdin/stdout/stderr channels, share one byte pipe; frames
//! interleave, but the bytes of one frame never do.

pub mod channel;
pub mod codec;
pub mod command;
pub mod error;
pub mod parser;
pub mod writer;

#[cfg(feature = "async")]
pub mod async_codec;

pub use channel::{Capabilities, ChannelKind};
pub use codec::{
    encode_frame, encode_header, Frame, FrameConfig, FrameHeader, ACK_PAYLOAD_SIZE, HEADER_SIZE,
    MAX_PAYLOAD, MAX_PROCESS_ID,
};
pub use command::{Command, CommandFamily};
pub use error::{FrameError, Result};
pub use parser::{Advance, FrameParser, ParserState};
pub use writer::FrameWriter;

#[cfg(feature = "async")]
pub use async_codec::UsbFrameCodec;
