use std::time::Duration;

use boardlink_frame::FrameConfig;

/// Credit granted to the device on stdout and stderr when a process opens.
pub const DEFAULT_READ_CREDIT: u32 = 32_768;

/// Unacknowledged bytes a writable channel may have in flight.
pub const DEFAULT_WRITE_WINDOW: usize = 32_768;

/// Largest write window a [`Connection`](crate::Connection) accepts.
///
/// A connection writes to the transport while holding the lock its reader
/// thread needs, so one window of data has to fit in the transport's send
/// buffer even when the device is not reading. Larger windows are clamped.
pub const MAX_CONNECTION_WRITE_WINDOW: usize = 65_536;

/// Configuration for a [`Demultiplexer`](crate::Demultiplexer).
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// Outbound framing (write chunk size).
    pub frame: FrameConfig,
    /// Bytes of stdout/stderr credit announced when a process opens.
    /// Zero disables the initial announcement.
    pub initial_read_credit: u32,
    /// Acknowledge every inbound stdout/stderr write with its length.
    pub auto_ack_reads: bool,
    /// Window used by [`ChannelState::would_block`](crate::ChannelState::would_block).
    /// A [`Connection`](crate::Connection) clamps it to
    /// [`MAX_CONNECTION_WRITE_WINDOW`].
    pub write_window: usize,
    /// Send `CLOSE` once a process has exited and both output channels closed.
    pub close_on_exit: bool,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            initial_read_credit: DEFAULT_READ_CREDIT,
            auto_ack_reads: true,
            write_window: DEFAULT_WRITE_WINDOW,
            close_on_exit: true,
        }
    }
}

/// Configuration for a threaded [`Connection`](crate::Connection).
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub mux: MuxConfig,
    /// How long a write may wait for the flow-control window to open.
    pub write_timeout: Duration,
    /// Default wait used by callers that poll for events.
    pub event_timeout: Duration,
}

impl ConnectionConfig {
    /// Copy of the config with the write window clamped to
    /// [`MAX_CONNECTION_WRITE_WINDOW`].
    pub(crate) fn clamped(mut self) -> Self {
        self.mux.write_window = self.mux.write_window.clamp(1, MAX_CONNECTION_WRITE_WINDOW);
        self
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            mux: MuxConfig::default(),
            write_timeout: Duration::from_secs(10),
            event_timeout: Duration::from_secs(30),
        }
    }
}
