//! In-memory duplex pipe.
//!
//! Each end owns the sending half towards its peer and shares the receiving
//! half with its clones. Chunks are delivered exactly as written, which makes
//! the pipe useful for exercising arbitrary chunk boundaries in tests.

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::{Buf, Bytes};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// One end of an in-memory duplex pipe.
#[derive(Clone)]
pub struct MemoryStream {
    tx: Sender<Bytes>,
    inbound: Arc<Mutex<Inbound>>,
    shared: Arc<Shared>,
}

struct Inbound {
    rx: Receiver<Bytes>,
    pending: Bytes,
}

struct Shared {
    closed: AtomicBool,
    read_timeout: Mutex<Option<Duration>>,
}

/// Create a connected pair of in-memory streams.
pub fn memory_pair() -> (MemoryStream, MemoryStream) {
    let (left_tx, right_rx) = mpsc::channel();
    let (right_tx, left_rx) = mpsc::channel();
    (
        MemoryStream::new(left_tx, left_rx),
        MemoryStream::new(right_tx, right_rx),
    )
}

impl MemoryStream {
    fn new(tx: Sender<Bytes>, rx: Receiver<Bytes>) -> Self {
        Self {
            tx,
            inbound: Arc::new(Mutex::new(Inbound {
                rx,
                pending: Bytes::new(),
            })),
            shared: Arc::new(Shared {
                closed: AtomicBool::new(false),
                read_timeout: Mutex::new(None),
            }),
        }
    }

    /// Set read timeout. `None` blocks until data or end of stream.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) {
        if let Ok(mut slot) = self.shared.read_timeout.lock() {
            *slot = timeout;
        }
    }

    /// Close this end: local reads report end of stream and writes fail.
    pub fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    fn read_timeout(&self) -> Option<Duration> {
        self.shared.read_timeout.lock().ok().and_then(|slot| *slot)
    }
}

impl Read for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let deadline = self.read_timeout().map(|t| Instant::now() + t);
        let mut inbound = self
            .inbound
            .lock()
            .map_err(|_| std::io::Error::other("memory stream poisoned"))?;

        while inbound.pending.is_empty() {
            if self.is_closed() {
                return Ok(0);
            }
            match inbound.rx.recv_timeout(POLL_INTERVAL) {
                Ok(chunk) => inbound.pending = chunk,
                Err(RecvTimeoutError::Timeout) => {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        return Err(std::io::Error::from(ErrorKind::WouldBlock));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }

        let n = inbound.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&inbound.pending[..n]);
        inbound.pending.advance(n);
        Ok(n)
    }
}

impl Write for MemoryStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.is_closed() {
            return Err(std::io::Error::from(ErrorKind::BrokenPipe));
        }
        self.tx
            .send(Bytes::copy_from_slice(buf))
            .map_err(|_| std::io::Error::from(ErrorKind::BrokenPipe))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
