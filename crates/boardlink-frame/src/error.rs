/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The process id does not fit the one-byte header field.
    #[error("invalid process id {0} (must be 0-255)")]
    InvalidProcessId(u32),

    /// The payload does not fit the one-byte length field.
    #[error("invalid payload length ({len} bytes, max {max})")]
    InvalidLength { len: usize, max: usize },

    /// The header carries a command byte outside the protocol vocabulary.
    #[error("unknown command byte 0x{0:02x}")]
    UnknownCommand(u8),

    /// An acknowledgement payload is too long to hold a byte count.
    #[error("invalid acknowledgement payload ({len} bytes, max 4)")]
    InvalidAck { len: usize },

    /// An I/O error occurred while writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was written.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl FrameError {
    /// Returns true for errors caused by bytes received from the peer.
    ///
    /// There is no delimiter to resynchronize on, so these are fatal to the
    /// whole connection.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            FrameError::UnknownCommand(_) | FrameError::InvalidAck { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
