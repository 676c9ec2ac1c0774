//! Per-process and per-channel bookkeeping held in the demultiplexer arena.

use std::collections::VecDeque;

use boardlink_frame::ChannelKind;
use bytes::{Buf, Bytes, BytesMut};

/// State of one channel of one process.
#[derive(Debug, Clone)]
pub struct ChannelState {
    kind: ChannelKind,
    open: bool,
    sent: u64,
    acked: u64,
    received: u64,
    buffer: VecDeque<Bytes>,
    buffered: usize,
}

impl ChannelState {
    fn new(kind: ChannelKind) -> Self {
        Self {
            kind,
            open: true,
            sent: 0,
            acked: 0,
            received: 0,
            buffer: VecDeque::new(),
            buffered: 0,
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Total bytes written towards the device on this channel.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Total bytes the peer acknowledged on this channel.
    pub fn acked(&self) -> u64 {
        self.acked
    }

    /// Total bytes received from the device on this channel.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Bytes sent but not yet acknowledged.
    pub fn outstanding(&self) -> u64 {
        self.sent.saturating_sub(self.acked)
    }

    /// Bytes acknowledged ahead of being sent (credit granted by the peer).
    pub fn credit(&self) -> u64 {
        self.acked.saturating_sub(self.sent)
    }

    /// Whether sending `len` more bytes would push the unacknowledged
    /// total past `window`.
    ///
    /// A channel with nothing outstanding never blocks, so a single write
    /// larger than the window can still make progress.
    pub fn would_block(&self, len: usize, window: usize) -> bool {
        let outstanding = self.outstanding();
        outstanding > 0 && outstanding.saturating_add(len as u64) > window as u64
    }

    /// Bytes received but not yet read.
    pub fn buffered(&self) -> usize {
        self.buffered
    }

    pub(crate) fn record_sent(&mut self, len: usize) {
        self.sent = self.sent.saturating_add(len as u64);
    }

    /// Apply an acknowledgement and return the new outstanding count.
    pub(crate) fn record_ack(&mut self, amount: u32) -> u64 {
        self.acked = self.acked.saturating_add(u64::from(amount));
        self.outstanding()
    }

    pub(crate) fn push(&mut self, data: Bytes) {
        self.received = self.received.saturating_add(data.len() as u64);
        self.buffered += data.len();
        self.buffer.push_back(data);
    }

    /// Copy buffered bytes into `buf`, returning how many were copied.
    pub(crate) fn drain_into(&mut self, buf: &mut [u8]) -> usize {
        let mut copied = 0;
        while copied < buf.len() {
            let Some(front) = self.buffer.front_mut() else {
                break;
            };
            let n = front.len().min(buf.len() - copied);
            buf[copied..copied + n].copy_from_slice(&front[..n]);
            front.advance(n);
            copied += n;
            if front.is_empty() {
                self.buffer.pop_front();
            }
        }
        self.buffered -= copied;
        copied
    }

    /// Remove everything buffered as one contiguous chunk.
    pub(crate) fn take_buffered(&mut self) -> Option<Bytes> {
        let data = match self.buffer.len() {
            0 => return None,
            1 => self.buffer.pop_front()?,
            _ => {
                let mut joined = BytesMut::with_capacity(self.buffered);
                for chunk in self.buffer.drain(..) {
                    joined.extend_from_slice(&chunk);
                }
                joined.freeze()
            }
        };
        self.buffer.clear();
        self.buffered = 0;
        Some(data)
    }

    /// Mark the channel closed. Returns false if it already was.
    pub(crate) fn close(&mut self) -> bool {
        std::mem::replace(&mut self.open, false)
    }
}

/// One remote process tracked by the demultiplexer.
#[derive(Debug, Clone)]
pub struct ProcessEntry {
    id: u8,
    active: bool,
    exit_code: Option<u8>,
    force_killed: bool,
    close_sent: bool,
    channels: [ChannelState; 4],
}

impl ProcessEntry {
    pub(crate) fn new(id: u8) -> Self {
        Self {
            id,
            active: true,
            exit_code: None,
            force_killed: false,
            close_sent: false,
            channels: ChannelKind::ALL.map(ChannelState::new),
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    /// True until the device reports an exit status.
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn exit_code(&self) -> Option<u8> {
        self.exit_code
    }

    /// True once the host asked for the process to be killed.
    pub fn force_killed(&self) -> bool {
        self.force_killed
    }

    /// A non-zero exit that the host did not cause by killing the process.
    pub fn exited_with_error(&self) -> bool {
        self.exit_code.is_some_and(|code| code != 0) && !self.force_killed
    }

    pub fn close_sent(&self) -> bool {
        self.close_sent
    }

    pub fn channel(&self, kind: ChannelKind) -> &ChannelState {
        &self.channels[kind.index()]
    }

    pub(crate) fn channel_mut(&mut self, kind: ChannelKind) -> &mut ChannelState {
        &mut self.channels[kind.index()]
    }

    pub(crate) fn mark_exited(&mut self, code: u8) {
        self.active = false;
        self.exit_code = Some(code);
    }

    pub(crate) fn mark_killed(&mut self) {
        self.force_killed = true;
    }

    pub(crate) fn mark_close_sent(&mut self) {
        self.close_sent = true;
    }

    /// Exited with stdout and stderr both closed, and `CLOSE` not yet sent.
    pub(crate) fn ready_to_close(&self) -> bool {
        !self.active
            && !self.close_sent
            && !self.channel(ChannelKind::Stdout).is_open()
            && !self.channel(ChannelKind::Stderr).is_open()
    }

    /// Move buffered stdout and stderr out of the entry at teardown.
    pub(crate) fn take_unread(&mut self) -> Vec<(ChannelKind, Bytes)> {
        [ChannelKind::Stdout, ChannelKind::Stderr]
            .into_iter()
            .filter_map(|kind| Some((kind, self.channel_mut(kind).take_buffered()?)))
            .collect()
    }
}

/// Something that happened to a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// The process was registered (opened locally or by the device).
    Opened,
    /// The device reported the remote program's exit code.
    Exited { code: u8 },
    /// The device reported a `KILL` for the process.
    Killed { signal: u8 },
    /// Output arrived and is buffered on the channel.
    Data { channel: ChannelKind, len: usize },
    /// The peer acknowledged bytes written on the channel.
    Acked {
        channel: ChannelKind,
        amount: u32,
        outstanding: u64,
    },
    /// The device closed one channel.
    ChannelClosed { channel: ChannelKind },
    /// Output that was still buffered when the process was torn down.
    /// Queued just before [`Closed`](Self::Closed); the process and its id
    /// are already gone.
    Unread { channel: ChannelKind, data: Bytes },
    /// The process was torn down.
    Closed { exited_with_error: bool },
}

/// A [`ProcessEvent`] tagged with its process id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxEvent {
    pub process_id: u8,
    pub event: ProcessEvent,
}

impl MuxEvent {
    pub fn new(process_id: u8, event: ProcessEvent) -> Self {
        Self { process_id, event }
    }
}
