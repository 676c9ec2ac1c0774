use std::time::Duration;

use boardlink_frame::{ChannelKind, FrameError};

/// Errors that can occur while multiplexing processes over one transport.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// Frame-level error (encoding, parsing, or writing).
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] boardlink_transport::TransportError),

    /// The device sent output for a process id that is not open.
    #[error("device sent data for unknown process {0}")]
    UnknownProcess(u8),

    /// The caller referenced a process id that is not open.
    #[error("no open process with id {0}")]
    NoSuchProcess(u8),

    /// Write or close attempted after the channel was closed.
    #[error("{channel} channel of process {process_id} is closed")]
    ChannelClosed { process_id: u8, channel: ChannelKind },

    /// The host cannot write to this channel.
    #[error("{0} channel is not writable")]
    NotWritable(ChannelKind),

    /// The host cannot read from this channel.
    #[error("{0} channel is not readable")]
    NotReadable(ChannelKind),

    /// Every process id is in use.
    #[error("process limit reached (256 concurrent processes)")]
    ProcessLimit,

    /// The connection was torn down after a fatal error.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Operation timed out.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl MuxError {
    /// Returns true when the error leaves the transport unusable.
    ///
    /// Protocol violations cannot be recovered from since the stream has no
    /// delimiter to resynchronize on. Encoding, lookup and channel-state
    /// errors only concern the call that produced them.
    pub fn is_fatal(&self) -> bool {
        match self {
            MuxError::Frame(err) => {
                err.is_protocol_violation()
                    || matches!(err, FrameError::Io(_) | FrameError::ConnectionClosed)
            }
            MuxError::Transport(_) | MuxError::UnknownProcess(_) => true,
            MuxError::ConnectionFailed(_) => true,
            MuxError::NoSuchProcess(_)
            | MuxError::ChannelClosed { .. }
            | MuxError::NotWritable(_)
            | MuxError::NotReadable(_)
            | MuxError::ProcessLimit
            | MuxError::Timeout(_) => false,
        }
    }
}

impl From<MuxError> for std::io::Error {
    fn from(err: MuxError) -> Self {
        use std::io::ErrorKind;

        let kind = match &err {
            MuxError::ChannelClosed { .. } => ErrorKind::BrokenPipe,
            MuxError::NoSuchProcess(_) => ErrorKind::NotFound,
            MuxError::NotWritable(_) | MuxError::NotReadable(_) => ErrorKind::Unsupported,
            MuxError::Timeout(_) => ErrorKind::TimedOut,
            MuxError::ConnectionFailed(_) => ErrorKind::NotConnected,
            MuxError::Frame(FrameError::Io(io)) => io.kind(),
            MuxError::Frame(FrameError::InvalidLength { .. })
            | MuxError::Frame(FrameError::InvalidProcessId(_)) => ErrorKind::InvalidInput,
            _ => ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}

pub type Result<T> = std::result::Result<T, MuxError>;
