use std::io::{Read, Write};
#[cfg(unix)]
use std::path::Path;
use std::time::Duration;

#[cfg(unix)]
use tracing::debug;

use crate::error::Result;
#[cfg(unix)]
use crate::error::TransportError;
use crate::memory::MemoryStream;

/// A connected duplex byte stream to the board. Implements Read + Write.
///
/// Bytes written here reach the device in order; bytes read here arrive in
/// order but in chunks whose boundaries carry no meaning.
pub struct TransportStream {
    inner: TransportStreamInner,
}

enum TransportStreamInner {
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
    Memory(MemoryStream),
}

impl Read for TransportStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            TransportStreamInner::Unix(stream) => stream.read(buf),
            TransportStreamInner::Memory(stream) => stream.read(buf),
        }
    }
}

impl Write for TransportStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            TransportStreamInner::Unix(stream) => stream.write(buf),
            TransportStreamInner::Memory(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            TransportStreamInner::Unix(stream) => stream.flush(),
            TransportStreamInner::Memory(stream) => stream.flush(),
        }
    }
}

impl TransportStream {
    /// Connect to a USB bridge listening on a Unix domain socket (blocking).
    #[cfg(unix)]
    pub fn connect_unix(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let stream =
            std::os::unix::net::UnixStream::connect(path).map_err(|e| TransportError::Connect {
                path: path.to_path_buf(),
                source: e,
            })?;
        debug!(?path, "connected to usb bridge socket");
        Ok(Self::from_unix(stream))
    }

    /// Wrap an already connected Unix domain socket stream.
    #[cfg(unix)]
    pub fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: TransportStreamInner::Unix(stream),
        }
    }

    /// Wrap one end of an in-memory pipe.
    pub fn from_memory(stream: MemoryStream) -> Self {
        Self {
            inner: TransportStreamInner::Memory(stream),
        }
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            TransportStreamInner::Unix(stream) => {
                stream.set_read_timeout(timeout).map_err(Into::into)
            }
            TransportStreamInner::Memory(stream) => {
                stream.set_read_timeout(timeout);
                Ok(())
            }
        }
    }

    /// Try to clone this stream so reading and writing can happen on
    /// different threads.
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            #[cfg(unix)]
            TransportStreamInner::Unix(stream) => {
                let cloned = stream.try_clone()?;
                Ok(Self::from_unix(cloned))
            }
            TransportStreamInner::Memory(stream) => Ok(Self::from_memory(stream.clone())),
        }
    }

    /// Shut down both directions. A reader blocked on this stream (or a
    /// clone of it) observes end of stream.
    pub fn shutdown(&self) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            TransportStreamInner::Unix(stream) => {
                match stream.shutdown(std::net::Shutdown::Both) {
                    Ok(()) => Ok(()),
                    Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
                    Err(err) => Err(err.into()),
                }
            }
            TransportStreamInner::Memory(stream) => {
                stream.shutdown();
                Ok(())
            }
        }
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            #[cfg(unix)]
            TransportStreamInner::Unix(_) => "usb-bridge-socket",
            TransportStreamInner::Memory(_) => "memory",
        }
    }
}

impl std::fmt::Debug for TransportStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportStream")
            .field("type", &self.transport_name())
            .finish()
    }
}
