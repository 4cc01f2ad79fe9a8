//! Transport (`spec.md` §4.1): a byte-oriented duplex channel. Two
//! interchangeable variants — [`remote::RemoteTransport`] (TCP) and
//! [`local::LocalTransport`] (in-process ring-buffer pair) — implement the
//! same [`Transport`] contract so that [`crate::protocol::FramedChannel`] and
//! everything built on top of it (`Port`, `ControlConnection`, ...) is
//! transport-agnostic.

pub(crate) mod local;
pub(crate) mod remote;

use std::io::{self, Read, Write};
use std::time::Duration;

use crate::error::Result;

pub(crate) use local::LocalTransport;
#[cfg(test)]
pub(crate) use local::{LocalAcceptor, LocalListener};
pub(crate) use remote::RemoteTransport;

/// A single bidirectional byte pipe, shared with the server.
///
/// Implementors additionally implement [`Read`] and [`Write`] so that a
/// [`crate::protocol::FramedChannel`] can be layered directly on top without
/// redundant wrapper methods for every byte operation.
pub(crate) trait Transport: Read + Write + Send {
    /// Returns `true` iff bytes are readable within `timeout`. `None` means
    /// wait indefinitely; `Some(Duration::ZERO)` polls without blocking.
    fn wait(&mut self, timeout: Option<Duration>) -> Result<bool>;

    /// Releases the transport's resources. Tolerates being called more than
    /// once (`spec.md` §4.1: "tolerate double-close").
    fn close(&mut self);

    /// Forces any buffered output onto the wire.
    fn flush_transport(&mut self) -> Result<()> {
        Write::flush(self).map_err(Into::into)
    }
}

/// A transport that is either a TCP socket or an in-process ring-buffer
/// pair, so [`crate::port::Port`] can be generic over "some transport"
/// without naming either concrete type.
pub(crate) enum AnyTransport {
    Remote(RemoteTransport),
    Local(LocalTransport),
}

impl Read for AnyTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            AnyTransport::Remote(t) => t.read(buf),
            AnyTransport::Local(t) => t.read(buf),
        }
    }
}

impl Write for AnyTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            AnyTransport::Remote(t) => t.write(buf),
            AnyTransport::Local(t) => t.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            AnyTransport::Remote(t) => t.flush(),
            AnyTransport::Local(t) => t.flush(),
        }
    }
}

impl Transport for AnyTransport {
    fn wait(&mut self, timeout: Option<Duration>) -> Result<bool> {
        match self {
            AnyTransport::Remote(t) => t.wait(timeout),
            AnyTransport::Local(t) => t.wait(timeout),
        }
    }

    fn close(&mut self) {
        match self {
            AnyTransport::Remote(t) => t.close(),
            AnyTransport::Local(t) => t.close(),
        }
    }
}
