//! Routes parsed frames to processes and serializes outbound writes.

use std::collections::VecDeque;
use std::io::Write;

use boardlink_frame::{codec, ChannelKind, Command, CommandFamily, Frame, FrameParser, FrameWriter};
use tracing::{debug, error, trace, warn};

use crate::config::MuxConfig;
use crate::error::{MuxError, Result};
use crate::handle::ProcessHandle;
use crate::ids::{IdAllocator, PROCESS_ID_COUNT};
use crate::process::{MuxEvent, ProcessEntry, ProcessEvent};

/// Multiplexes remote processes over one transport.
///
/// The demultiplexer is the only writer to the transport: every outbound
/// frame, including acknowledgements generated while handling inbound
/// frames, goes through its [`FrameWriter`]. Inbound bytes are handed to
/// [`receive`](Self::receive) in whatever chunks the transport delivers.
///
/// Nothing here blocks on the peer. Handling a frame updates the process
/// arena and queues a [`MuxEvent`] for [`poll_event`](Self::poll_event).
pub struct Demultiplexer<W> {
    writer: FrameWriter<W>,
    parser: FrameParser,
    config: MuxConfig,
    ids: IdAllocator,
    processes: Vec<Option<ProcessEntry>>,
    events: VecDeque<MuxEvent>,
}

impl<W: Write> Demultiplexer<W> {
    pub fn new(transport: W) -> Self {
        Self::with_config(transport, MuxConfig::default())
    }

    pub fn with_config(transport: W, config: MuxConfig) -> Self {
        Self {
            writer: FrameWriter::with_config(transport, config.frame.clone()),
            parser: FrameParser::new(),
            config,
            ids: IdAllocator::new(),
            processes: vec![None; PROCESS_ID_COUNT],
            events: VecDeque::new(),
        }
    }

    /// Feed bytes read from the transport.
    ///
    /// Every frame completed by `data` is dispatched in order; frames that
    /// precede a malformed header are still handled. Returns the number of
    /// frames handled. Errors for which [`MuxError::is_fatal`] holds mean the
    /// transport must be torn down.
    pub fn receive(&mut self, data: &[u8]) -> Result<usize> {
        let mut frames = Vec::new();
        let parsed = self.parser.feed_with(data, |frame| frames.push(frame));

        let count = frames.len();
        for frame in frames {
            self.dispatch(frame)?;
        }
        parsed?;
        Ok(count)
    }

    fn dispatch(&mut self, frame: Frame) -> Result<()> {
        trace!(
            command = %frame.command,
            process_id = frame.process_id,
            arg = frame.arg,
            len = frame.payload_len(),
            "dispatching frame"
        );
        match frame.command.family() {
            CommandFamily::Lifecycle => self.on_lifecycle(&frame),
            CommandFamily::DeviceWrite => self.on_output(frame),
            CommandFamily::Ack => self.on_ack(&frame),
            CommandFamily::ChannelClose => self.on_channel_close(&frame),
            CommandFamily::HostWrite => {
                warn!(
                    command = %frame.command,
                    process_id = frame.process_id,
                    "ignoring host-direction write received from device"
                );
                Ok(())
            }
        }
    }

    fn on_lifecycle(&mut self, frame: &Frame) -> Result<()> {
        let id = frame.process_id;
        match frame.command {
            Command::Reset => {
                debug!("device reset all processes");
                self.drop_all();
                Ok(())
            }
            Command::Open => {
                if !self.ids.claim(id) {
                    warn!(process_id = id, "ignoring OPEN for a process that is already open");
                    return Ok(());
                }
                self.processes[usize::from(id)] = Some(ProcessEntry::new(id));
                debug!(process_id = id, "device opened process");
                self.events.push_back(MuxEvent::new(id, ProcessEvent::Opened));
                self.grant_read_credit(id)
            }
            Command::Kill => {
                if self.live(id).is_none() {
                    warn!(process_id = id, "ignoring KILL for unknown process");
                    return Ok(());
                }
                debug!(process_id = id, signal = frame.arg, "device killed process");
                self.events
                    .push_back(MuxEvent::new(id, ProcessEvent::Killed { signal: frame.arg }));
                Ok(())
            }
            Command::ExitStatus => self.on_exit(id, frame.arg),
            Command::Close | Command::CloseAck => {
                self.teardown(id);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn on_exit(&mut self, id: u8, code: u8) -> Result<()> {
        let Some(entry) = self.live_mut(id) else {
            warn!(process_id = id, "ignoring EXIT_STATUS for unknown process");
            return Ok(());
        };
        entry.mark_exited(code);
        debug!(process_id = id, code, "process exited");
        self.events
            .push_back(MuxEvent::new(id, ProcessEvent::Exited { code }));

        self.close_local(id, ChannelKind::Control)?;
        self.close_local(id, ChannelKind::Stdin)?;
        self.close_if_finished(id)
    }

    fn on_output(&mut self, frame: Frame) -> Result<()> {
        let id = frame.process_id;
        let Some(channel) = frame.channel() else {
            return Ok(());
        };
        let len = frame.payload_len();

        let Some(entry) = self.live_mut(id) else {
            error!(process_id = id, %channel, "device sent output for unknown process");
            return Err(MuxError::UnknownProcess(id));
        };
        let state = entry.channel_mut(channel);
        if !state.is_open() {
            warn!(process_id = id, %channel, len, "dropping output for closed channel");
            return Ok(());
        }
        if len == 0 {
            return Ok(());
        }
        state.push(frame.payload);
        self.events
            .push_back(MuxEvent::new(id, ProcessEvent::Data { channel, len }));

        if self.config.auto_ack_reads {
            self.writer
                .send_encoded(&codec::ack(channel, id, len as u32))?;
        }
        Ok(())
    }

    fn on_ack(&mut self, frame: &Frame) -> Result<()> {
        let id = frame.process_id;
        let Some(channel) = frame.channel() else {
            return Ok(());
        };
        let amount = frame.ack_amount()?;

        let Some(entry) = self.live_mut(id) else {
            warn!(process_id = id, %channel, amount, "ignoring ack for unknown process");
            return Ok(());
        };
        let outstanding = entry.channel_mut(channel).record_ack(amount);
        trace!(process_id = id, %channel, amount, outstanding, "ack");
        self.events.push_back(MuxEvent::new(
            id,
            ProcessEvent::Acked {
                channel,
                amount,
                outstanding,
            },
        ));
        Ok(())
    }

    fn on_channel_close(&mut self, frame: &Frame) -> Result<()> {
        let id = frame.process_id;
        let Some(channel) = frame.channel() else {
            return Ok(());
        };
        let Some(entry) = self.live_mut(id) else {
            warn!(process_id = id, %channel, "ignoring channel close for unknown process");
            return Ok(());
        };
        if entry.channel_mut(channel).close() {
            debug!(process_id = id, %channel, "device closed channel");
            self.events
                .push_back(MuxEvent::new(id, ProcessEvent::ChannelClosed { channel }));
        }
        self.close_if_finished(id)
    }

    /// Open a new remote process on the lowest free id.
    ///
    /// Sends `OPEN`, then grants the configured stdout/stderr credit.
    pub fn open_process(&mut self) -> Result<u8> {
        let id = self.ids.allocate().ok_or(MuxError::ProcessLimit)?;
        if let Err(err) = self.writer.send_encoded(&codec::new_process(id)) {
            self.ids.release(id);
            return Err(err.into());
        }
        self.processes[usize::from(id)] = Some(ProcessEntry::new(id));
        debug!(process_id = id, "opened process");
        self.events.push_back(MuxEvent::new(id, ProcessEvent::Opened));
        self.grant_read_credit(id)?;
        Ok(id)
    }

    fn grant_read_credit(&mut self, id: u8) -> Result<()> {
        let credit = self.config.initial_read_credit;
        if credit == 0 {
            return Ok(());
        }
        for channel in [ChannelKind::Stdout, ChannelKind::Stderr] {
            self.writer.send_encoded(&codec::ack(channel, id, credit))?;
        }
        Ok(())
    }

    /// Send `data` on a writable channel, chunked into frames of at most
    /// 255 payload bytes. Returns the number of bytes sent.
    pub fn write(&mut self, id: u8, channel: ChannelKind, data: &[u8]) -> Result<usize> {
        self.check_writable(id, channel)?;
        let frames = self.writer.write_chunked(channel, id, data)?;
        if let Some(entry) = self.live_mut(id) {
            entry.channel_mut(channel).record_sent(data.len());
        }
        trace!(process_id = id, %channel, len = data.len(), frames, "wrote channel data");
        Ok(data.len())
    }

    /// Fails unless `channel` of process `id` can take a write right now.
    pub fn check_writable(&self, id: u8, channel: ChannelKind) -> Result<()> {
        if !channel.capabilities().writable {
            return Err(MuxError::NotWritable(channel));
        }
        let entry = self.live(id).ok_or(MuxError::NoSuchProcess(id))?;
        if !entry.channel(channel).is_open() {
            return Err(MuxError::ChannelClosed {
                process_id: id,
                channel,
            });
        }
        Ok(())
    }

    /// Whether writing `len` bytes now would exceed the write window.
    pub fn would_block(&self, id: u8, channel: ChannelKind, len: usize) -> Result<bool> {
        let entry = self.live(id).ok_or(MuxError::NoSuchProcess(id))?;
        Ok(entry.channel(channel).would_block(len, self.config.write_window))
    }

    /// Copy buffered output of a readable channel into `buf`.
    ///
    /// Returns 0 when nothing is buffered; check the channel state to tell
    /// an idle channel from a finished one. Output still buffered at
    /// teardown is handed over in [`ProcessEvent::Unread`] instead.
    pub fn read(&mut self, id: u8, channel: ChannelKind, buf: &mut [u8]) -> Result<usize> {
        if !channel.capabilities().readable {
            return Err(MuxError::NotReadable(channel));
        }
        let entry = self.live_mut(id).ok_or(MuxError::NoSuchProcess(id))?;
        Ok(entry.channel_mut(channel).drain_into(buf))
    }

    /// Close one channel and tell the device. Closing a closed channel is a
    /// no-op.
    pub fn close_channel(&mut self, id: u8, channel: ChannelKind) -> Result<()> {
        if self.live(id).is_none() {
            return Err(MuxError::NoSuchProcess(id));
        }
        self.close_local(id, channel)?;
        self.close_if_finished(id)
    }

    fn close_local(&mut self, id: u8, channel: ChannelKind) -> Result<()> {
        let closed = self
            .live_mut(id)
            .is_some_and(|entry| entry.channel_mut(channel).close());
        if closed {
            self.writer.send_encoded(&codec::channel_close(channel, id))?;
            debug!(process_id = id, %channel, "closed channel");
        }
        Ok(())
    }

    fn close_if_finished(&mut self, id: u8) -> Result<()> {
        if !self.config.close_on_exit {
            return Ok(());
        }
        if self.live(id).is_some_and(ProcessEntry::ready_to_close) {
            self.send_close(id)?;
        }
        Ok(())
    }

    /// Send `KILL` with `signal` in the argument byte.
    ///
    /// The process stays registered until the device confirms teardown.
    pub fn kill(&mut self, id: u8, signal: u8) -> Result<()> {
        let entry = self.live_mut(id).ok_or(MuxError::NoSuchProcess(id))?;
        entry.mark_killed();
        self.writer.send_encoded(&codec::kill_process(id, signal))?;
        debug!(process_id = id, signal, "killed process");
        Ok(())
    }

    /// Kill every process that has not exited yet. Returns how many were
    /// signalled.
    pub fn kill_all(&mut self, signal: u8) -> Result<usize> {
        let active: Vec<u8> = self
            .processes
            .iter()
            .flatten()
            .filter(|entry| entry.is_active())
            .map(ProcessEntry::id)
            .collect();
        for &id in &active {
            self.kill(id, signal)?;
        }
        Ok(active.len())
    }

    /// Ask the device to release the process. It is removed once the
    /// device answers with `CLOSE_ACK`.
    pub fn close_process(&mut self, id: u8) -> Result<()> {
        if self.live(id).is_none() {
            return Err(MuxError::NoSuchProcess(id));
        }
        self.send_close(id)
    }

    fn send_close(&mut self, id: u8) -> Result<()> {
        self.writer.send_encoded(&codec::close_process(id))?;
        if let Some(entry) = self.live_mut(id) {
            entry.mark_close_sent();
        }
        debug!(process_id = id, "sent CLOSE");
        Ok(())
    }

    /// Send `RESET` and drop all local process state.
    pub fn reset(&mut self) -> Result<()> {
        self.writer.send_encoded(&codec::reset())?;
        self.drop_all();
        self.parser.reset();
        debug!("reset all processes");
        Ok(())
    }

    /// Drop process `id` and free its id. Unread output travels in
    /// `Unread` events queued ahead of `Closed`.
    fn teardown(&mut self, id: u8) {
        let Some(entry) = self.processes[usize::from(id)].take() else {
            warn!(process_id = id, "ignoring teardown of unknown process");
            return;
        };
        self.ids.release(id);
        self.retire(entry);
    }

    fn drop_all(&mut self) {
        let entries: Vec<ProcessEntry> = self
            .processes
            .iter_mut()
            .filter_map(Option::take)
            .collect();
        self.ids.clear();
        for entry in entries {
            self.retire(entry);
        }
    }

    fn retire(&mut self, mut entry: ProcessEntry) {
        let id = entry.id();
        let exited_with_error = entry.exited_with_error();
        for (channel, data) in entry.take_unread() {
            debug!(process_id = id, %channel, len = data.len(), "handing over unread output");
            self.events
                .push_back(MuxEvent::new(id, ProcessEvent::Unread { channel, data }));
        }
        debug!(process_id = id, exited_with_error, "process closed");
        self.events
            .push_back(MuxEvent::new(id, ProcessEvent::Closed { exited_with_error }));
    }

    /// Next queued event, oldest first.
    pub fn poll_event(&mut self) -> Option<MuxEvent> {
        self.events.pop_front()
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    /// Borrow a handle to process `id`.
    pub fn process(&mut self, id: u8) -> Option<ProcessHandle<'_, W>> {
        self.processes[usize::from(id)].as_ref()?;
        Some(ProcessHandle::new(self, id))
    }

    pub fn entry(&self, id: u8) -> Option<&ProcessEntry> {
        self.processes[usize::from(id)].as_ref()
    }

    /// Ids of registered processes, lowest first.
    pub fn process_ids(&self) -> impl Iterator<Item = u8> + '_ {
        self.processes.iter().flatten().map(ProcessEntry::id)
    }

    pub fn process_count(&self) -> usize {
        self.process_ids().count()
    }

    /// Flush the transport.
    pub fn flush(&mut self) -> Result<()> {
        Ok(self.writer.flush()?)
    }

    pub fn config(&self) -> &MuxConfig {
        &self.config
    }

    /// Total bytes written to the transport.
    pub fn bytes_written(&self) -> u64 {
        self.writer.bytes_written()
    }

    pub fn frames_received(&self) -> u64 {
        self.parser.frames_parsed()
    }

    pub fn transport(&self) -> &W {
        self.writer.get_ref()
    }

    pub fn transport_mut(&mut self) -> &mut W {
        self.writer.get_mut()
    }

    fn live(&self, id: u8) -> Option<&ProcessEntry> {
        self.processes[usize::from(id)].as_ref()
    }

    fn live_mut(&mut self, id: u8) -> Option<&mut ProcessEntry> {
        self.processes[usize::from(id)].as_mut()
    }
}

#[cfg(test)]
mod tests {
    use boardlink_frame::FrameError;
    use bytes::Bytes;

    use super::*;

    fn quiet_config() -> MuxConfig {
        MuxConfig {
            initial_read_credit: 0,
            ..MuxConfig::default()
        }
    }

    fn demux() -> Demultiplexer<Vec<u8>> {
        Demultiplexer::with_config(Vec::new(), quiet_config())
    }

    /// Frames written to the transport since the last call.
    fn sent(demux: &mut Demultiplexer<Vec<u8>>) -> Vec<Frame> {
        let bytes = std::mem::take(demux.transport_mut());
        FrameParser::new().feed(&bytes).unwrap()
    }

    fn events(demux: &mut Demultiplexer<Vec<u8>>) -> Vec<ProcessEvent> {
        std::iter::from_fn(|| demux.poll_event())
            .map(|e| e.event)
            .collect()
    }

    fn header(command: Command, id: u8, arg: u8) -> [u8; 4] {
        [command.as_byte(), id, arg, 0]
    }

    #[test]
    fn open_grants_initial_credit() {
        let mut demux = Demultiplexer::new(Vec::new());
        assert_eq!(demux.open_process().unwrap(), 0);
        assert_eq!(
            demux.transport().as_slice(),
            &[
                0x01, 0x00, 0x00, 0x00, //
                0x22, 0x00, 0x00, 0x04, 0x00, 0x80, 0x00, 0x00, //
                0x23, 0x00, 0x00, 0x04, 0x00, 0x80, 0x00, 0x00,
            ]
        );
        assert_eq!(events(&mut demux), vec![ProcessEvent::Opened]);
    }

    #[test]
    fn ids_are_reused_lowest_first() {
        let mut demux = demux();
        assert_eq!(demux.open_process().unwrap(), 0);
        assert_eq!(demux.open_process().unwrap(), 1);
        assert_eq!(demux.open_process().unwrap(), 2);

        demux.receive(&header(Command::CloseAck, 1, 0)).unwrap();
        assert_eq!(demux.open_process().unwrap(), 1);
        assert_eq!(demux.process_count(), 3);
    }

    #[test]
    fn process_limit() {
        let mut demux = demux();
        for expected in 0..=255u8 {
            assert_eq!(demux.open_process().unwrap(), expected);
        }
        assert!(matches!(demux.open_process(), Err(MuxError::ProcessLimit)));
    }

    #[test]
    fn three_writes_three_acks_return_to_zero() {
        let mut demux = demux();
        let id = demux.open_process().unwrap();
        sent(&mut demux);

        for len in [10usize, 20, 30] {
            demux.write(id, ChannelKind::Stdin, &vec![b'x'; len]).unwrap();
        }
        let frames = sent(&mut demux);
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.command == Command::WriteStdin));
        assert_eq!(
            demux.entry(id).unwrap().channel(ChannelKind::Stdin).outstanding(),
            60
        );
        events(&mut demux);

        let mut wire = Vec::new();
        for len in [10u32, 20, 30] {
            wire.extend_from_slice(&codec::ack(ChannelKind::Stdin, id, len));
        }
        demux.receive(&wire).unwrap();

        let outstanding: Vec<u64> = events(&mut demux)
            .into_iter()
            .map(|event| match event {
                ProcessEvent::Acked {
                    channel: ChannelKind::Stdin,
                    outstanding,
                    ..
                } => outstanding,
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(outstanding, vec![50, 30, 0]);

        let stdin = demux.entry(id).unwrap().channel(ChannelKind::Stdin);
        assert_eq!(stdin.sent(), 60);
        assert_eq!(stdin.acked(), 60);
        assert_eq!(stdin.outstanding(), 0);
    }

    #[test]
    fn large_writes_are_chunked_in_order() {
        let mut demux = demux();
        let id = demux.open_process().unwrap();
        sent(&mut demux);

        let data: Vec<u8> = (0..600u32).map(|i| (i % 251) as u8).collect();
        assert_eq!(demux.write(id, ChannelKind::Stdin, &data).unwrap(), 600);

        let frames = sent(&mut demux);
        let sizes: Vec<usize> = frames.iter().map(Frame::payload_len).collect();
        assert_eq!(sizes, vec![255, 255, 90]);
        let joined: Vec<u8> = frames.iter().flat_map(|f| f.payload.to_vec()).collect();
        assert_eq!(joined, data);
    }

    #[test]
    fn output_is_buffered_and_acked() {
        let mut demux = demux();
        let id = demux.open_process().unwrap();
        sent(&mut demux);
        events(&mut demux);

        demux.receive(&[0x12, id, 0x00, 0x02, b'h', b'i']).unwrap();
        assert_eq!(
            events(&mut demux),
            vec![ProcessEvent::Data {
                channel: ChannelKind::Stdout,
                len: 2
            }]
        );

        let acks = sent(&mut demux);
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].command, Command::AckStdout);
        assert_eq!(acks[0].ack_amount().unwrap(), 2);

        let mut buf = [0u8; 8];
        assert_eq!(demux.read(id, ChannelKind::Stdout, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"hi");
        assert_eq!(demux.read(id, ChannelKind::Stdout, &mut buf).unwrap(), 0);
    }

    #[test]
    fn output_split_across_reads() {
        let mut demux = demux();
        let id = demux.open_process().unwrap();

        let wire = [0x13, id, 0x00, 0x03, b'e', b'r', b'r'];
        for byte in wire {
            demux.receive(&[byte]).unwrap();
        }
        assert_eq!(
            demux.entry(id).unwrap().channel(ChannelKind::Stderr).buffered(),
            3
        );
    }

    #[test]
    fn output_for_unknown_process_is_fatal() {
        let mut demux = demux();
        let err = demux.receive(&[0x12, 9, 0, 1, b'x']).unwrap_err();
        assert!(matches!(err, MuxError::UnknownProcess(9)));
        assert!(err.is_fatal());
    }

    #[test]
    fn late_frames_for_unknown_process_are_ignored() {
        let mut demux = demux();
        demux
            .receive(&codec::ack(ChannelKind::Stdin, 4, 10))
            .unwrap();
        demux.receive(&header(Command::CloseStdout, 4, 0)).unwrap();
        demux.receive(&header(Command::CloseAck, 4, 0)).unwrap();
        demux.receive(&header(Command::ExitStatus, 4, 1)).unwrap();
        assert!(events(&mut demux).is_empty());
        assert!(sent(&mut demux).is_empty());
    }

    #[test]
    fn oversized_ack_is_fatal() {
        let mut demux = demux();
        let id = demux.open_process().unwrap();
        let err = demux
            .receive(&[0x21, id, 0, 5, 1, 2, 3, 4, 5])
            .unwrap_err();
        assert!(matches!(err, MuxError::Frame(FrameError::InvalidAck { len: 5 })));
        assert!(err.is_fatal());
    }

    #[test]
    fn frames_before_unknown_command_are_handled() {
        let mut demux = demux();
        let err = demux
            .receive(&[0x01, 0x07, 0x00, 0x00, 0x7f, 0x00, 0x00, 0x00])
            .unwrap_err();
        assert!(matches!(err, MuxError::Frame(FrameError::UnknownCommand(0x7f))));
        assert!(err.is_fatal());
        assert!(demux.entry(7).is_some());
        assert_eq!(events(&mut demux), vec![ProcessEvent::Opened]);
    }

    #[test]
    fn exit_then_close_lifecycle() {
        let mut demux = demux();
        let id = demux.open_process().unwrap();
        sent(&mut demux);
        events(&mut demux);

        demux.receive(&header(Command::ExitStatus, id, 3)).unwrap();
        assert_eq!(events(&mut demux), vec![ProcessEvent::Exited { code: 3 }]);
        let closes: Vec<Command> = sent(&mut demux).iter().map(|f| f.command).collect();
        assert_eq!(closes, vec![Command::CloseControl, Command::CloseStdin]);

        assert!(matches!(
            demux.write(id, ChannelKind::Stdin, b"late"),
            Err(MuxError::ChannelClosed {
                channel: ChannelKind::Stdin,
                ..
            })
        ));

        demux.receive(&header(Command::CloseStdout, id, 0)).unwrap();
        assert!(sent(&mut demux).is_empty());

        demux.receive(&header(Command::CloseStderr, id, 0)).unwrap();
        let close = sent(&mut demux);
        assert_eq!(close, vec![Frame::header_only(Command::Close, id, 0)]);

        // A repeated close from the device does not trigger a second CLOSE.
        demux.receive(&header(Command::CloseStderr, id, 0)).unwrap();
        assert!(sent(&mut demux).is_empty());

        demux.receive(&header(Command::CloseAck, id, 0)).unwrap();
        assert_eq!(
            events(&mut demux),
            vec![
                ProcessEvent::ChannelClosed {
                    channel: ChannelKind::Stdout
                },
                ProcessEvent::ChannelClosed {
                    channel: ChannelKind::Stderr
                },
                ProcessEvent::Closed {
                    exited_with_error: true
                },
            ]
        );
        assert!(demux.entry(id).is_none());
        assert_eq!(demux.open_process().unwrap(), id);
    }

    #[test]
    fn kill_is_not_an_error_exit() {
        let mut demux = demux();
        let id = demux.open_process().unwrap();
        sent(&mut demux);
        events(&mut demux);

        demux.kill(id, 9).unwrap();
        assert_eq!(sent(&mut demux), vec![Frame::header_only(Command::Kill, id, 9)]);

        demux.receive(&header(Command::ExitStatus, id, 137)).unwrap();
        demux.receive(&header(Command::CloseAck, id, 0)).unwrap();
        assert_eq!(
            events(&mut demux).last(),
            Some(&ProcessEvent::Closed {
                exited_with_error: false
            })
        );
    }

    #[test]
    fn close_on_exit_can_be_disabled() {
        let mut demux = Demultiplexer::with_config(
            Vec::new(),
            MuxConfig {
                close_on_exit: false,
                ..quiet_config()
            },
        );
        let id = demux.open_process().unwrap();
        sent(&mut demux);

        let mut wire = Vec::new();
        wire.extend_from_slice(&header(Command::ExitStatus, id, 0));
        wire.extend_from_slice(&header(Command::CloseStdout, id, 0));
        wire.extend_from_slice(&header(Command::CloseStderr, id, 0));
        demux.receive(&wire).unwrap();

        let commands: Vec<Command> = sent(&mut demux).iter().map(|f| f.command).collect();
        assert_eq!(commands, vec![Command::CloseControl, Command::CloseStdin]);

        demux.close_process(id).unwrap();
        assert_eq!(sent(&mut demux), vec![Frame::header_only(Command::Close, id, 0)]);
    }

    #[test]
    fn channel_capabilities_are_enforced() {
        let mut demux = demux();
        let id = demux.open_process().unwrap();
        let mut buf = [0u8; 4];

        assert!(matches!(
            demux.write(id, ChannelKind::Stdout, b"x"),
            Err(MuxError::NotWritable(ChannelKind::Stdout))
        ));
        assert!(matches!(
            demux.read(id, ChannelKind::Stdin, &mut buf),
            Err(MuxError::NotReadable(ChannelKind::Stdin))
        ));
        assert!(matches!(
            demux.write(42, ChannelKind::Stdin, b"x"),
            Err(MuxError::NoSuchProcess(42))
        ));
    }

    #[test]
    fn closing_a_channel_is_idempotent() {
        let mut demux = demux();
        let id = demux.open_process().unwrap();
        sent(&mut demux);

        demux.close_channel(id, ChannelKind::Stdin).unwrap();
        demux.close_channel(id, ChannelKind::Stdin).unwrap();
        assert_eq!(
            sent(&mut demux),
            vec![Frame::header_only(Command::CloseStdin, id, 0)]
        );

        assert!(matches!(
            demux.write(id, ChannelKind::Stdin, b"x"),
            Err(MuxError::ChannelClosed { .. })
        ));
        // The other channels are unaffected.
        demux.write(id, ChannelKind::Control, b"ls").unwrap();
    }

    #[test]
    fn output_on_closed_channel_is_dropped() {
        let mut demux = demux();
        let id = demux.open_process().unwrap();
        demux.close_channel(id, ChannelKind::Stdout).unwrap();
        sent(&mut demux);
        events(&mut demux);

        demux.receive(&[0x12, id, 0, 1, b'x']).unwrap();
        assert!(events(&mut demux).is_empty());
        assert!(sent(&mut demux).is_empty());
    }

    #[test]
    fn unread_output_survives_teardown() {
        let mut demux = demux();
        let id = demux.open_process().unwrap();

        let mut wire = vec![0x12, id, 0, 4];
        wire.extend_from_slice(b"late");
        wire.extend_from_slice(&header(Command::ExitStatus, id, 0));
        wire.extend_from_slice(&header(Command::CloseStdout, id, 0));
        wire.extend_from_slice(&header(Command::CloseStderr, id, 0));
        wire.extend_from_slice(&header(Command::CloseAck, id, 0));
        demux.receive(&wire).unwrap();

        assert_eq!(demux.process_count(), 0);
        assert!(demux.entry(id).is_none());
        let mut buf = [0u8; 16];
        assert!(matches!(
            demux.read(id, ChannelKind::Stdout, &mut buf),
            Err(MuxError::NoSuchProcess(_))
        ));

        let tail: Vec<ProcessEvent> = events(&mut demux).into_iter().rev().take(2).collect();
        assert_eq!(
            tail,
            vec![
                ProcessEvent::Closed {
                    exited_with_error: false
                },
                ProcessEvent::Unread {
                    channel: ChannelKind::Stdout,
                    data: Bytes::from_static(b"late")
                },
            ]
        );
    }

    #[test]
    fn unread_teardown_frees_ids() {
        let mut demux = demux();
        for _ in 0..PROCESS_ID_COUNT {
            let id = demux.open_process().unwrap();
            demux.receive(&[0x12, id, 0, 1, b'x']).unwrap();
            demux.receive(&header(Command::CloseAck, id, 0)).unwrap();
        }
        assert_eq!(demux.process_count(), 0);
        assert_eq!(demux.open_process().unwrap(), 0);
    }

    #[test]
    fn device_can_reopen_an_id_torn_down_with_unread_output() {
        let mut demux = demux();
        let id = demux.open_process().unwrap();
        demux.receive(&[0x13, id, 0, 2, b'e', b'1']).unwrap();
        demux.receive(&header(Command::CloseAck, id, 0)).unwrap();
        events(&mut demux);

        demux.receive(&header(Command::Open, id, 0)).unwrap();
        demux.receive(&[0x12, id, 0, 2, b'o', b'2']).unwrap();
        assert_eq!(
            events(&mut demux),
            vec![
                ProcessEvent::Opened,
                ProcessEvent::Data {
                    channel: ChannelKind::Stdout,
                    len: 2
                }
            ]
        );

        let mut buf = [0u8; 8];
        assert_eq!(demux.read(id, ChannelKind::Stdout, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"o2");
        assert_eq!(demux.read(id, ChannelKind::Stderr, &mut buf).unwrap(), 0);
    }

    #[test]
    fn reset_hands_over_unread_output() {
        let mut demux = demux();
        let id = demux.open_process().unwrap();
        demux.receive(&[0x12, id, 0, 2, b'o', b'k']).unwrap();
        events(&mut demux);

        demux.receive(&header(Command::Reset, 0, 0)).unwrap();
        assert_eq!(
            events(&mut demux),
            vec![
                ProcessEvent::Unread {
                    channel: ChannelKind::Stdout,
                    data: Bytes::from_static(b"ok")
                },
                ProcessEvent::Closed {
                    exited_with_error: false
                },
            ]
        );
    }

    #[test]
    fn device_open_registers_process() {
        let mut demux = Demultiplexer::new(Vec::new());
        demux.receive(&header(Command::Open, 12, 0)).unwrap();
        assert_eq!(events(&mut demux), vec![ProcessEvent::Opened]);
        assert_eq!(demux.process_ids().collect::<Vec<_>>(), vec![12]);

        let credits: Vec<Command> = sent(&mut demux).iter().map(|f| f.command).collect();
        assert_eq!(credits, vec![Command::AckStdout, Command::AckStderr]);

        demux.receive(&header(Command::Open, 12, 0)).unwrap();
        assert!(events(&mut demux).is_empty());
    }

    #[test]
    fn device_kill_is_reported() {
        let mut demux = demux();
        let id = demux.open_process().unwrap();
        events(&mut demux);

        demux.receive(&header(Command::Kill, id, 15)).unwrap();
        assert_eq!(events(&mut demux), vec![ProcessEvent::Killed { signal: 15 }]);
    }

    #[test]
    fn device_reset_drops_everything() {
        let mut demux = demux();
        demux.open_process().unwrap();
        demux.open_process().unwrap();
        events(&mut demux);

        demux.receive(&header(Command::Reset, 0, 0)).unwrap();
        assert_eq!(
            events(&mut demux),
            vec![
                ProcessEvent::Closed {
                    exited_with_error: false
                };
                2
            ]
        );
        assert_eq!(demux.process_count(), 0);
        assert_eq!(demux.open_process().unwrap(), 0);
    }

    #[test]
    fn reset_sends_reset() {
        let mut demux = demux();
        demux.open_process().unwrap();
        sent(&mut demux);

        demux.reset().unwrap();
        assert_eq!(sent(&mut demux), vec![Frame::header_only(Command::Reset, 0, 0)]);
        assert_eq!(demux.process_count(), 0);
    }

    #[test]
    fn kill_all_skips_exited_processes() {
        let mut demux = demux();
        let first = demux.open_process().unwrap();
        let second = demux.open_process().unwrap();
        demux.receive(&header(Command::ExitStatus, first, 0)).unwrap();
        sent(&mut demux);

        assert_eq!(demux.kill_all(9).unwrap(), 1);
        assert_eq!(
            sent(&mut demux),
            vec![Frame::header_only(Command::Kill, second, 9)]
        );
    }

    #[test]
    fn window_tracks_outstanding_bytes() {
        let mut demux = Demultiplexer::with_config(
            Vec::new(),
            MuxConfig {
                write_window: 8,
                ..quiet_config()
            },
        );
        let id = demux.open_process().unwrap();
        assert!(!demux.would_block(id, ChannelKind::Stdin, 64).unwrap());

        demux.write(id, ChannelKind::Stdin, b"12345678").unwrap();
        assert!(demux.would_block(id, ChannelKind::Stdin, 1).unwrap());

        demux.receive(&codec::ack(ChannelKind::Stdin, id, 8)).unwrap();
        assert!(!demux.would_block(id, ChannelKind::Stdin, 8).unwrap());
    }
}
