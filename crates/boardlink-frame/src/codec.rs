use bytes::{BufMut, Bytes, BytesMut};

use crate::channel::ChannelKind;
use crate::command::Command;
use crate::error::{FrameError, Result};

/// Frame header: command (1) + process id (1) + arg (1) + length (1) = 4 bytes.
pub const HEADER_SIZE: usize = 4;

/// Largest payload a single frame can carry (the length field is one byte).
pub const MAX_PAYLOAD: usize = u8::MAX as usize;

/// Largest process id a header can carry.
pub const MAX_PROCESS_ID: u32 = u8::MAX as u32;

/// Payload size of the acknowledgements the host emits (`u32` LE).
pub const ACK_PAYLOAD_SIZE: usize = 4;

/// The four header fields of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub command: Command,
    pub process_id: u8,
    pub arg: u8,
    pub length: u8,
}

impl FrameHeader {
    pub fn new(command: Command, process_id: u8, arg: u8, length: u8) -> Self {
        Self {
            command,
            process_id,
            arg,
            length,
        }
    }

    /// Wire representation.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        [
            self.command.as_byte(),
            self.process_id,
            self.arg,
            self.length,
        ]
    }

    /// Extract the fields of a complete header.
    ///
    /// Fails with [`FrameError::UnknownCommand`] if byte 0 is not a command.
    pub fn from_bytes(bytes: [u8; HEADER_SIZE]) -> Result<Self> {
        Ok(Self {
            command: Command::try_from(bytes[0])?,
            process_id: bytes[1],
            arg: bytes[2],
            length: bytes[3],
        })
    }
}

/// A complete frame: header fields plus `length` payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub process_id: u8,
    pub arg: u8,
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(command: Command, process_id: u8, arg: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            command,
            process_id,
            arg,
            payload: payload.into(),
        }
    }

    /// A frame without payload.
    pub fn header_only(command: Command, process_id: u8, arg: u8) -> Self {
        Self::new(command, process_id, arg, Bytes::new())
    }

    /// The header describing this frame.
    pub fn header(&self) -> Result<FrameHeader> {
        Ok(FrameHeader::new(
            self.command,
            self.process_id,
            self.arg,
            payload_length(self.payload.len())?,
        ))
    }

    /// Value of the length field.
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// The channel this frame concerns, if any.
    pub fn channel(&self) -> Option<ChannelKind> {
        self.command.channel()
    }

    /// Number of bytes acknowledged by an `ACK_*` frame.
    ///
    /// The count is a little-endian unsigned integer filling the payload
    /// (1 to 4 bytes). Without a payload the count is carried in `arg`.
    pub fn ack_amount(&self) -> Result<u32> {
        match self.payload.len() {
            0 => Ok(u32::from(self.arg)),
            n @ 1..=ACK_PAYLOAD_SIZE => {
                let mut raw = [0u8; ACK_PAYLOAD_SIZE];
                raw[..n].copy_from_slice(&self.payload);
                Ok(u32::from_le_bytes(raw))
            }
            n => Err(FrameError::InvalidAck { len: n }),
        }
    }
}

fn payload_length(len: usize) -> Result<u8> {
    u8::try_from(len).map_err(|_| FrameError::InvalidLength {
        len,
        max: MAX_PAYLOAD,
    })
}

/// Encode a header from loosely typed fields.
///
/// Fails with `InvalidProcessId` if `process_id` exceeds 255 and with
/// `InvalidLength` if `length` exceeds 255; larger payloads must be split
/// into several frames by the caller.
pub fn encode_header(
    command: Command,
    process_id: u32,
    arg: u8,
    length: usize,
) -> Result<[u8; HEADER_SIZE]> {
    let process_id =
        u8::try_from(process_id).map_err(|_| FrameError::InvalidProcessId(process_id))?;
    let length = payload_length(length)?;
    Ok(FrameHeader::new(command, process_id, arg, length).to_bytes())
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌─────────┬────────────┬─────┬────────┬─────────────────────┐
/// │ Command │ Process id │ Arg │ Length │ Payload             │
/// │ (1B)    │ (1B)       │(1B) │ (1B)   │ (Length bytes)      │
/// └─────────┴────────────┴─────┴────────┴─────────────────────┘
/// ```
pub fn encode_frame(
    command: Command,
    process_id: u8,
    arg: u8,
    payload: &[u8],
    dst: &mut BytesMut,
) -> Result<()> {
    let length = payload_length(payload.len())?;
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&FrameHeader::new(command, process_id, arg, length).to_bytes());
    dst.put_slice(payload);
    Ok(())
}

/// `RESET`: drop all remote process state.
pub fn reset() -> [u8; HEADER_SIZE] {
    FrameHeader::new(Command::Reset, 0, 0, 0).to_bytes()
}

/// `OPEN`: create remote process `id`.
pub fn new_process(id: u8) -> [u8; HEADER_SIZE] {
    FrameHeader::new(Command::Open, id, 0, 0).to_bytes()
}

/// `KILL`: signal remote process `id` with `code`.
pub fn kill_process(id: u8, code: u8) -> [u8; HEADER_SIZE] {
    FrameHeader::new(Command::Kill, id, code, 0).to_bytes()
}

/// `CLOSE`: release remote process `id`.
pub fn close_process(id: u8) -> [u8; HEADER_SIZE] {
    FrameHeader::new(Command::Close, id, 0, 0).to_bytes()
}

/// `EXIT_STATUS`: remote process `id` terminated with `code`.
pub fn exit_status(id: u8, code: u8) -> [u8; HEADER_SIZE] {
    FrameHeader::new(Command::ExitStatus, id, code, 0).to_bytes()
}

/// `CLOSE_ACK`: remote process `id` has been released.
pub fn close_ack(id: u8) -> [u8; HEADER_SIZE] {
    FrameHeader::new(Command::CloseAck, id, 0, 0).to_bytes()
}

/// Header for a write of `length` bytes on `channel`.
pub fn channel_write(channel: ChannelKind, id: u8, length: usize) -> Result<[u8; HEADER_SIZE]> {
    encode_header(channel.write_command(), u32::from(id), 0, length)
}

/// `WRITE_CONTROL` header for `length` bytes.
pub fn control_write(id: u8, length: usize) -> Result<[u8; HEADER_SIZE]> {
    channel_write(ChannelKind::Control, id, length)
}

/// `WRITE_STDIN` header for `length` bytes.
pub fn stdin_write(id: u8, length: usize) -> Result<[u8; HEADER_SIZE]> {
    channel_write(ChannelKind::Stdin, id, length)
}

/// `CLOSE_<CHANNEL>` for `channel`.
pub fn channel_close(channel: ChannelKind, id: u8) -> [u8; HEADER_SIZE] {
    FrameHeader::new(channel.close_command(), id, 0, 0).to_bytes()
}

pub fn control_close(id: u8) -> [u8; HEADER_SIZE] {
    channel_close(ChannelKind::Control, id)
}

pub fn stdin_close(id: u8) -> [u8; HEADER_SIZE] {
    channel_close(ChannelKind::Stdin, id)
}

pub fn stdout_close(id: u8) -> [u8; HEADER_SIZE] {
    channel_close(ChannelKind::Stdout, id)
}

pub fn stderr_close(id: u8) -> [u8; HEADER_SIZE] {
    channel_close(ChannelKind::Stderr, id)
}

/// `ACK_<CHANNEL>` acknowledging `amount` bytes: header plus `u32` LE payload.
pub fn ack(channel: ChannelKind, id: u8, amount: u32) -> [u8; HEADER_SIZE + ACK_PAYLOAD_SIZE] {
    let header = FrameHeader::new(channel.ack_command(), id, 0, ACK_PAYLOAD_SIZE as u8).to_bytes();
    let amount = amount.to_le_bytes();
    [
        header[0], header[1], header[2], header[3], amount[0], amount[1], amount[2], amount[3],
    ]
}

/// Configuration for frame writing.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Largest payload placed in one write frame. Default: 255.
    ///
    /// Values outside 1..=255 are clamped.
    pub max_chunk_size: usize,
}

impl FrameConfig {
    /// The chunk size actually used on the wire.
    pub fn effective_chunk_size(&self) -> usize {
        self.max_chunk_size.clamp(1, MAX_PAYLOAD)
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: MAX_PAYLOAD,
        }
    }
}
