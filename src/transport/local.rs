//! In-process variant of [`super::Transport`]: a pair of bounded ring
//! buffers shared between a client-side handle and a server-side handle
//! running in the same address space (`spec.md` §4.1), behind the same
//! [`super::Transport`] interface the remote transport implements, so the
//! rest of the stack never needs to know which one it is talking to.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::Result;

use super::Transport;

const RING_CAPACITY: usize = 64 * 1024;

struct Ring {
    buf: Mutex<VecDeque<u8>>,
    not_empty: Condvar,
    closed: Mutex<bool>,
}

impl Ring {
    fn new() -> Self {
        Self {
            buf: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
            not_empty: Condvar::new(),
            closed: Mutex::new(false),
        }
    }

    fn close(&self) {
        *self.closed.lock().unwrap() = true;
        self.not_empty.notify_all();
    }

    fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }
}

/// One endpoint of a [`LocalTransport`] pair: reads from `inbox`, writes to
/// `outbox`.
pub(crate) struct LocalTransport {
    inbox: Arc<Ring>,
    outbox: Arc<Ring>,
}

impl LocalTransport {
    /// Creates the two ends of an in-process byte pipe: `(client, server)`.
    pub(crate) fn pair() -> (Self, Self) {
        let a = Arc::new(Ring::new());
        let b = Arc::new(Ring::new());

        let client = LocalTransport {
            inbox: a.clone(),
            outbox: b.clone(),
        };
        let server = LocalTransport {
            inbox: b,
            outbox: a,
        };

        (client, server)
    }
}

impl Read for LocalTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut queue = self.inbox.buf.lock().unwrap();

        while queue.is_empty() {
            if self.inbox.is_closed() {
                return Ok(0);
            }
            queue = self.inbox.not_empty.wait(queue).unwrap();
        }

        let n = std::cmp::min(buf.len(), queue.len());
        for slot in buf.iter_mut().take(n) {
            *slot = queue.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for LocalTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.outbox.is_closed() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer closed"));
        }

        let mut queue = self.outbox.buf.lock().unwrap();
        queue.extend(buf.iter().copied());
        drop(queue);
        self.outbox.not_empty.notify_all();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The accepting half of an in-process listener: each [`LocalListener::connect`]
/// builds a fresh [`LocalTransport::pair`] and sends the server side here,
/// mirroring `TcpListener::accept` for tests that need a fake server to
/// service more than one connection (e.g. a control connection plus the
/// worker ports `beginWorker` opens on demand) over the same endpoint.
#[cfg(test)]
pub(crate) struct LocalAcceptor {
    receiver: std::sync::mpsc::Receiver<LocalTransport>,
}

#[cfg(test)]
impl LocalAcceptor {
    pub(crate) fn accept(&self) -> LocalTransport {
        self.receiver
            .recv()
            .expect("LocalListener dropped before a pending connect was accepted")
    }
}

/// The dialing half of an in-process listener (`spec.md` §9, "raw pointer
/// passing in the in-process transport" re-expressed as an ordinary
/// in-process queue). Cloned freely: every clone dials the same
/// [`LocalAcceptor`].
#[cfg(test)]
#[derive(Clone)]
pub(crate) struct LocalListener {
    sender: std::sync::mpsc::Sender<LocalTransport>,
}

#[cfg(test)]
impl LocalListener {
    pub(crate) fn bind() -> (LocalListener, LocalAcceptor) {
        let (sender, receiver) = std::sync::mpsc::channel();
        (LocalListener { sender }, LocalAcceptor { receiver })
    }

    pub(crate) fn connect(&self) -> LocalTransport {
        let (client, server) = LocalTransport::pair();
        let _ = self.sender.send(server);
        client
    }
}

#[cfg(test)]
impl std::fmt::Debug for LocalListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalListener").finish_non_exhaustive()
    }
}

impl Transport for LocalTransport {
    fn wait(&mut self, timeout: Option<Duration>) -> Result<bool> {
        let mut queue = self.inbox.buf.lock().unwrap();

        if !queue.is_empty() || self.inbox.is_closed() {
            return Ok(!queue.is_empty());
        }

        match timeout {
            None => {
                while queue.is_empty() && !self.inbox.is_closed() {
                    queue = self.inbox.not_empty.wait(queue).unwrap();
                }
                Ok(!queue.is_empty())
            }
            Some(Duration::ZERO) => Ok(false),
            Some(d) => {
                let deadline = Instant::now() + d;
                loop {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(!queue.is_empty());
                    }
                    let (q, result) =
                        self.inbox.not_empty.wait_timeout(queue, remaining).unwrap();
                    queue = q;
                    if !queue.is_empty() || self.inbox.is_closed() || result.timed_out() {
                        return Ok(!queue.is_empty());
                    }
                }
            }
        }
    }

    fn close(&mut self) {
        self.inbox.close();
        self.outbox.close();
    }
}
