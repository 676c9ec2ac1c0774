//! Borrowed views of one process and its channels.

use std::io::{self, Read, Write};

use boardlink_frame::{Capabilities, ChannelKind};

use crate::demux::Demultiplexer;
use crate::error::Result;
use crate::process::ProcessEntry;

/// A channel that can be closed independently of its process.
pub trait Closeable {
    /// Close the channel and notify the device. Closing twice is a no-op.
    fn close(&mut self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

/// One remote process, borrowed from its [`Demultiplexer`].
pub struct ProcessHandle<'a, W: Write> {
    demux: &'a mut Demultiplexer<W>,
    id: u8,
}

impl<'a, W: Write> ProcessHandle<'a, W> {
    pub(crate) fn new(demux: &'a mut Demultiplexer<W>, id: u8) -> Self {
        Self { demux, id }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn control(&mut self) -> WritableChannel<'_, W> {
        self.writable(ChannelKind::Control)
    }

    pub fn stdin(&mut self) -> WritableChannel<'_, W> {
        self.writable(ChannelKind::Stdin)
    }

    pub fn stdout(&mut self) -> ReadableChannel<'_, W> {
        self.readable(ChannelKind::Stdout)
    }

    pub fn stderr(&mut self) -> ReadableChannel<'_, W> {
        self.readable(ChannelKind::Stderr)
    }

    /// The channel of the given kind, typed by what the host can do with it.
    pub fn channel(&mut self, kind: ChannelKind) -> Channel<'_, W> {
        if kind.capabilities().writable {
            Channel::Writable(self.writable(kind))
        } else {
            Channel::Readable(self.readable(kind))
        }
    }

    /// Send `KILL` with `signal`.
    pub fn kill(&mut self, signal: u8) -> Result<()> {
        self.demux.kill(self.id, signal)
    }

    /// Send `CLOSE`.
    pub fn close(&mut self) -> Result<()> {
        self.demux.close_process(self.id)
    }

    pub fn exit_code(&self) -> Option<u8> {
        self.state().and_then(ProcessEntry::exit_code)
    }

    pub fn is_active(&self) -> bool {
        self.state().is_some_and(ProcessEntry::is_active)
    }

    pub fn exited_with_error(&self) -> bool {
        self.state().is_some_and(ProcessEntry::exited_with_error)
    }

    pub fn state(&self) -> Option<&ProcessEntry> {
        self.demux.entry(self.id)
    }

    fn writable(&mut self, kind: ChannelKind) -> WritableChannel<'_, W> {
        WritableChannel {
            demux: &mut *self.demux,
            process_id: self.id,
            kind,
        }
    }

    fn readable(&mut self, kind: ChannelKind) -> ReadableChannel<'_, W> {
        ReadableChannel {
            demux: &mut *self.demux,
            process_id: self.id,
            kind,
        }
    }
}

/// Any channel of a process.
pub enum Channel<'a, W: Write> {
    Writable(WritableChannel<'a, W>),
    Readable(ReadableChannel<'a, W>),
}

impl<W: Write> Channel<'_, W> {
    pub fn kind(&self) -> ChannelKind {
        match self {
            Channel::Writable(ch) => ch.kind,
            Channel::Readable(ch) => ch.kind,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.kind().capabilities()
    }
}

impl<W: Write> Closeable for Channel<'_, W> {
    fn close(&mut self) -> Result<()> {
        match self {
            Channel::Writable(ch) => ch.close(),
            Channel::Readable(ch) => ch.close(),
        }
    }

    fn is_closed(&self) -> bool {
        match self {
            Channel::Writable(ch) => ch.is_closed(),
            Channel::Readable(ch) => ch.is_closed(),
        }
    }
}

/// Control or stdin: bytes flow to the device.
///
/// Writes are framed immediately; throttling against
/// [`outstanding`](Self::outstanding) is up to the caller.
pub struct WritableChannel<'a, W: Write> {
    demux: &'a mut Demultiplexer<W>,
    process_id: u8,
    kind: ChannelKind,
}

impl<W: Write> WritableChannel<'_, W> {
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Bytes written but not yet acknowledged by the device.
    pub fn outstanding(&self) -> u64 {
        self.demux
            .entry(self.process_id)
            .map_or(0, |entry| entry.channel(self.kind).outstanding())
    }

    pub fn acked(&self) -> u64 {
        self.demux
            .entry(self.process_id)
            .map_or(0, |entry| entry.channel(self.kind).acked())
    }

    pub fn would_block(&self, len: usize) -> bool {
        self.demux
            .would_block(self.process_id, self.kind, len)
            .unwrap_or(false)
    }
}

impl<W: Write> Write for WritableChannel<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.demux.write(self.process_id, self.kind, buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(self.demux.flush()?)
    }
}

impl<W: Write> Closeable for WritableChannel<'_, W> {
    fn close(&mut self) -> Result<()> {
        self.demux.close_channel(self.process_id, self.kind)
    }

    fn is_closed(&self) -> bool {
        channel_closed(&*self.demux, self.process_id, self.kind)
    }
}

/// Stdout or stderr: bytes flow from the device.
///
/// Reads return buffered output. With nothing buffered, a read fails with
/// `WouldBlock` while the channel is open and returns 0 once it is closed.
pub struct ReadableChannel<'a, W: Write> {
    demux: &'a mut Demultiplexer<W>,
    process_id: u8,
    kind: ChannelKind,
}

impl<W: Write> ReadableChannel<'_, W> {
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Bytes received and not yet read.
    pub fn buffered(&self) -> usize {
        self.demux
            .entry(self.process_id)
            .map_or(0, |entry| entry.channel(self.kind).buffered())
    }
}

impl<W: Write> Read for ReadableChannel<'_, W> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let Some(entry) = self.demux.entry(self.process_id) else {
            return Ok(0);
        };
        let open = entry.channel(self.kind).is_open();

        let read = self.demux.read(self.process_id, self.kind, buf)?;
        if read == 0 && open {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        Ok(read)
    }
}

impl<W: Write> Closeable for ReadableChannel<'_, W> {
    fn close(&mut self) -> Result<()> {
        self.demux.close_channel(self.process_id, self.kind)
    }

    fn is_closed(&self) -> bool {
        channel_closed(&*self.demux, self.process_id, self.kind)
    }
}

fn channel_closed<W: Write>(demux: &Demultiplexer<W>, id: u8, kind: ChannelKind) -> bool {
    !demux
        .entry(id)
        .is_some_and(|entry| entry.channel(kind).is_open())
}
