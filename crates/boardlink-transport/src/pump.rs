use std::io::{ErrorKind, Read};
use std::ops::ControlFlow;

use bytes::Bytes;
use tracing::{debug, trace};

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Something that happened on the inbound side of a transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// A chunk of bytes arrived. Chunk boundaries are arbitrary.
    Data(Bytes),
    /// Reading failed; the pump stops after delivering this.
    Error(std::io::Error),
    /// The peer closed the stream; the pump stops after delivering this.
    Closed,
}

/// Read from `reader` until end of stream or error, handing every chunk to
/// `on_event`.
///
/// Interrupted reads are retried. Read timeouts (`WouldBlock`/`TimedOut`)
/// are treated as idle polls. `on_event` returning `ControlFlow::Break`
/// stops the pump early.
pub fn pump<R, F>(mut reader: R, mut on_event: F)
where
    R: Read,
    F: FnMut(TransportEvent) -> ControlFlow<()>,
{
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    loop {
        let read = match reader.read(&mut chunk) {
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err)
                if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
            {
                continue
            }
            Err(err) => {
                debug!(error = %err, "transport read failed");
                let _ = on_event(TransportEvent::Error(err));
                return;
            }
        };

        if read == 0 {
            debug!("transport reached end of stream");
            let _ = on_event(TransportEvent::Closed);
            return;
        }

        trace!(len = read, "transport data");
        if on_event(TransportEvent::Data(Bytes::copy_from_slice(&chunk[..read]))).is_break() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn delivers_data_then_closed() {
        let mut seen = Vec::new();
        let mut closed = false;
        pump(Cursor::new(b"frame bytes".to_vec()), |event| {
            match event {
                TransportEvent::Data(data) => seen.extend_from_slice(&data),
                TransportEvent::Closed => closed = true,
                TransportEvent::Error(err) => panic!("unexpected error: {err}"),
            }
            ControlFlow::Continue(())
        });
        assert_eq!(seen, b"frame bytes");
        assert!(closed);
    }

    #[test]
    fn break_stops_pump() {
        let mut events = 0;
        pump(Cursor::new(vec![1u8; 4]), |_| {
            events += 1;
            ControlFlow::Break(())
        });
        assert_eq!(events, 1);
    }

    #[test]
    fn read_error_is_reported() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::from(ErrorKind::ConnectionReset))
            }
        }

        let mut kind = None;
        pump(Broken, |event| {
            if let TransportEvent::Error(err) = event {
                kind = Some(err.kind());
            }
            ControlFlow::Continue(())
        });
        assert_eq!(kind, Some(ErrorKind::ConnectionReset));
    }

    #[test]
    fn interrupted_read_retries() {
        struct InterruptedThenData {
            interrupted: bool,
            data: Cursor<Vec<u8>>,
        }
        impl Read for InterruptedThenData {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                if !self.interrupted {
                    self.interrupted = true;
                    return Err(std::io::Error::from(ErrorKind::Interrupted));
                }
                self.data.read(buf)
            }
        }

        let mut seen = Vec::new();
        pump(
            InterruptedThenData {
                interrupted: false,
                data: Cursor::new(b"ok".to_vec()),
            },
            |event| {
                if let TransportEvent::Data(data) = event {
                    seen.extend_from_slice(&data);
                }
                ControlFlow::Continue(())
            },
        );
        assert_eq!(seen, b"ok");
    }
}
