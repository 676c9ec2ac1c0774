//! A demultiplexer driven by a background reader thread.

use std::ops::ControlFlow;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use boardlink_frame::ChannelKind;
use boardlink_transport::{pump, TransportError, TransportEvent, TransportStream};
use tracing::{debug, error, warn};

use crate::config::ConnectionConfig;
use crate::demux::Demultiplexer;
use crate::error::{MuxError, Result};
use crate::process::{MuxEvent, ProcessEntry};

/// Signal sent to every live process when a connection shuts down.
pub const SHUTDOWN_SIGNAL: u8 = 9;

struct State {
    demux: Demultiplexer<TransportStream>,
    failure: Option<String>,
}

impl State {
    fn check(&self) -> Result<()> {
        match &self.failure {
            Some(reason) => Err(MuxError::ConnectionFailed(reason.clone())),
            None => Ok(()),
        }
    }

    /// Record the first failure; later ones are consequences of it.
    fn fail(&mut self, reason: String) {
        if self.failure.is_none() {
            self.failure = Some(reason);
        }
    }
}

struct Shared {
    state: Mutex<State>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, State>, timeout: Duration) -> MutexGuard<'a, State> {
        match self.changed.wait_timeout(guard, timeout) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        }
    }
}

/// One USB transport shared by any number of remote processes.
///
/// A reader thread feeds every inbound chunk to the [`Demultiplexer`];
/// callers on other threads open processes, write, and wait for events.
/// Writes wait for the flow-control window before sending. A protocol
/// violation or transport failure tears the connection down and every
/// later call returns [`MuxError::ConnectionFailed`].
///
/// Transport writes, including acknowledgements sent by the reader thread,
/// happen under the lock that guards the demultiplexer. The device must
/// therefore keep draining its side of the link. The write window is
/// clamped to [`MAX_CONNECTION_WRITE_WINDOW`](crate::MAX_CONNECTION_WRITE_WINDOW)
/// so one window fits in the transport's send buffer.
pub struct Connection {
    shared: Arc<Shared>,
    transport: TransportStream,
    reader: Option<JoinHandle<()>>,
    config: ConnectionConfig,
}

impl Connection {
    pub fn new(transport: TransportStream) -> Result<Self> {
        Self::with_config(transport, ConnectionConfig::default())
    }

    pub fn with_config(transport: TransportStream, config: ConnectionConfig) -> Result<Self> {
        let config = config.clamped();
        let writer = transport.try_clone()?;
        let reader_stream = transport.try_clone()?;
        let closer = transport.try_clone()?;

        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                demux: Demultiplexer::with_config(writer, config.mux.clone()),
                failure: None,
            }),
            changed: Condvar::new(),
        });

        let thread_shared = Arc::clone(&shared);
        let reader = thread::Builder::new()
            .name("boardlink-reader".into())
            .spawn(move || read_loop(reader_stream, closer, thread_shared))
            .map_err(TransportError::from)?;

        debug!(transport = transport.transport_name(), "connection started");
        Ok(Self {
            shared,
            transport,
            reader: Some(reader),
            config,
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Open a remote process and return its id.
    pub fn open_process(&self) -> Result<u8> {
        let mut state = self.shared.lock();
        state.check()?;
        let result = state.demux.open_process();
        self.settle(state, result)
    }

    /// Write `data` to a writable channel and return how many bytes were
    /// sent.
    ///
    /// Data is sent in pieces no larger than the write window. Before each
    /// piece the call waits, up to the write timeout, for acknowledgements
    /// to bring the outstanding byte count back under the window. Once a
    /// piece has gone out, a later timeout or channel error ends the call
    /// with the count sent so far, like a short [`std::io::Write::write`].
    /// Errors are returned only when nothing was sent or the connection
    /// failed.
    pub fn write(&self, id: u8, channel: ChannelKind, data: &[u8]) -> Result<usize> {
        let window = self.config.mux.write_window;
        let mut state = self.shared.lock();
        state.check()?;
        state.demux.check_writable(id, channel)?;

        let mut sent = 0;
        for piece in data.chunks(window) {
            let (guard, result) = self.send_piece(state, id, channel, piece);
            state = guard;
            match result {
                Ok(()) => sent += piece.len(),
                Err(err) if err.is_fatal() => return self.settle(state, Err(err)),
                Err(err) if sent == 0 => return Err(err),
                Err(err) => {
                    debug!(process_id = id, %channel, sent, error = %err, "short write");
                    break;
                }
            }
        }
        Ok(sent)
    }

    /// Wait for window room, then send one piece. The guard is handed back
    /// because waiting releases and reacquires it.
    fn send_piece<'a>(
        &self,
        mut state: MutexGuard<'a, State>,
        id: u8,
        channel: ChannelKind,
        piece: &[u8],
    ) -> (MutexGuard<'a, State>, Result<()>) {
        let deadline = Instant::now() + self.config.write_timeout;
        loop {
            if let Err(err) = state.check() {
                return (state, Err(err));
            }
            match state.demux.would_block(id, channel, piece.len()) {
                Ok(false) => break,
                Ok(true) => {}
                Err(err) => return (state, Err(err)),
            }
            let now = Instant::now();
            if now >= deadline {
                return (state, Err(MuxError::Timeout(self.config.write_timeout)));
            }
            state = self.shared.wait(state, deadline - now);
        }
        let result = state.demux.write(id, channel, piece).map(drop);
        (state, result)
    }

    pub fn close_channel(&self, id: u8, channel: ChannelKind) -> Result<()> {
        let mut state = self.shared.lock();
        state.check()?;
        let result = state.demux.close_channel(id, channel);
        self.settle(state, result)
    }

    pub fn kill(&self, id: u8, signal: u8) -> Result<()> {
        let mut state = self.shared.lock();
        state.check()?;
        let result = state.demux.kill(id, signal);
        self.settle(state, result)
    }

    pub fn kill_all(&self, signal: u8) -> Result<usize> {
        let mut state = self.shared.lock();
        state.check()?;
        let result = state.demux.kill_all(signal);
        self.settle(state, result)
    }

    pub fn close_process(&self, id: u8) -> Result<()> {
        let mut state = self.shared.lock();
        state.check()?;
        let result = state.demux.close_process(id);
        self.settle(state, result)
    }

    /// Drain buffered output of stdout or stderr into `buf`. Never waits;
    /// returns 0 when nothing is buffered.
    ///
    /// Output stays readable after the connection fails.
    pub fn read(&self, id: u8, channel: ChannelKind, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.shared.lock();
        state.demux.read(id, channel, buf)
    }

    /// Snapshot of a process's state.
    pub fn process(&self, id: u8) -> Option<ProcessEntry> {
        self.shared.lock().demux.entry(id).cloned()
    }

    /// Wait up to `timeout` for the next event.
    ///
    /// Queued events are delivered even after the connection failed; the
    /// failure is reported once the queue is empty. `Ok(None)` means the
    /// timeout elapsed.
    pub fn next_event(&self, timeout: Duration) -> Result<Option<MuxEvent>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        loop {
            if let Some(event) = state.demux.poll_event() {
                return Ok(Some(event));
            }
            state.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            state = self.shared.wait(state, deadline - now);
        }
    }

    /// Wait until process `id` has been torn down.
    pub fn wait_closed(&self, id: u8, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        loop {
            if state.demux.entry(id).is_none() {
                return Ok(());
            }
            state.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Err(MuxError::Timeout(timeout));
            }
            state = self.shared.wait(state, deadline - now);
        }
    }

    pub fn is_failed(&self) -> bool {
        self.shared.lock().failure.is_some()
    }

    /// Why the connection failed, if it did.
    pub fn failure(&self) -> Option<String> {
        self.shared.lock().failure.clone()
    }

    /// Kill every live process, close the transport, and join the reader.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        let Some(reader) = self.reader.take() else {
            return Ok(());
        };
        {
            let mut state = self.shared.lock();
            if state.failure.is_none() {
                match state.demux.kill_all(SHUTDOWN_SIGNAL) {
                    Ok(killed) if killed > 0 => debug!(killed, "killed processes on shutdown"),
                    Ok(_) => {}
                    Err(err) => warn!(error = %err, "failed to kill processes on shutdown"),
                }
            }
            state.fail("connection shut down".to_string());
        }
        self.shared.changed.notify_all();

        let closed = self.transport.shutdown();
        if reader.join().is_err() {
            error!("reader thread panicked");
        }
        debug!("connection stopped");
        Ok(closed?)
    }

    /// Mark the connection failed if `result` carries a fatal error.
    fn settle<T>(&self, mut state: MutexGuard<'_, State>, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.is_fatal() {
                error!(error = %err, "fatal connection error");
                state.fail(err.to_string());
                drop(state);
                self.shared.changed.notify_all();
                let _ = self.transport.shutdown();
            }
        }
        result
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            debug!(error = %err, "error while dropping connection");
        }
    }
}

fn read_loop(reader: TransportStream, closer: TransportStream, shared: Arc<Shared>) {
    pump(reader, |event| {
        let mut state = shared.lock();
        let flow = match event {
            TransportEvent::Data(bytes) => match state.demux.receive(&bytes) {
                Ok(_) => ControlFlow::Continue(()),
                Err(err) if err.is_fatal() => {
                    error!(error = %err, "fatal protocol error, closing connection");
                    state.fail(err.to_string());
                    ControlFlow::Break(())
                }
                Err(err) => {
                    warn!(error = %err, "failed to handle inbound frames");
                    ControlFlow::Continue(())
                }
            },
            TransportEvent::Error(err) => {
                state.fail(format!("transport read failed: {err}"));
                ControlFlow::Break(())
            }
            TransportEvent::Closed => {
                state.fail("transport closed by peer".to_string());
                ControlFlow::Break(())
            }
        };
        drop(state);
        shared.changed.notify_all();
        flow
    });

    if let Err(err) = closer.shutdown() {
        debug!(error = %err, "transport shutdown after reader exit failed");
    }
}
