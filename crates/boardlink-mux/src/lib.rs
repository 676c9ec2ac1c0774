//! Process and channel multiplexing over one boardlink transport.
//!
//! Each remote process gets a one-byte id and four channels (control,
//! stdin, stdout, stderr). The [`Demultiplexer`] routes parsed frames to
//! those channels, keeps per-channel flow-control counters, and is the only
//! writer to the transport. [`Connection`] drives it from a reader thread
//! for callers that want blocking, window-throttled writes.

pub mod config;
pub mod connection;
pub mod demux;
pub mod error;
pub mod handle;
pub mod ids;
pub mod process;

pub use config::{
    ConnectionConfig, MuxConfig, DEFAULT_READ_CREDIT, DEFAULT_WRITE_WINDOW,
    MAX_CONNECTION_WRITE_WINDOW,
};
pub use connection::{Connection, SHUTDOWN_SIGNAL};
pub use demux::Demultiplexer;
pub use error::{MuxError, Result};
pub use handle::{Channel, Closeable, ProcessHandle, ReadableChannel, WritableChannel};
pub use ids::{IdAllocator, PROCESS_ID_COUNT};
pub use process::{ChannelState, MuxEvent, ProcessEntry, ProcessEvent};
