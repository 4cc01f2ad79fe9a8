//! `Port` (`spec.md` §4.3): one logical bidirectional channel — one
//! transport, one [`FramedChannel`] — carrying a server-assigned `SlaveID`
//! and a transient `WorkerID`. Ports are the unit of pooling.
//!
//! Grounded on `Client2/Port.h`/`Port.cpp`: a `Port` owns exactly one
//! connection, knows whether it came from a worker pool (`isReuse`), and
//! exposes `open`/`close` plus the raw `writeObject`/`readObject` pair the
//! rest of the stack builds on.

use std::time::Duration;

use crate::error::{Error, ErrorKind, Result};
use crate::options::{DataSourceOptions, Endpoint};
use crate::protocol::{FramedChannel, MasterId, Value};
use crate::transport::{AnyTransport, RemoteTransport, Transport};

/// A single pooled connection to the server.
///
/// `id` is a client-local, purely diagnostic identifier (see
/// [`crate::id_allocator`]) — distinct from `slave_id`, which the server
/// assigns during the handshake.
pub(crate) struct Port {
    id: u32,
    channel: FramedChannel<AnyTransport>,
    slave_id: i32,
    worker_id: Option<i32>,
    master_id: MasterId,
    reuse: bool,
}

impl Port {
    /// Connects to `endpoint` and performs the handshake over the resulting
    /// transport (`spec.md` §6). `Endpoint::Local` has no standalone peer to
    /// dial, so callers that want an in-process `Port` pair should build a
    /// [`LocalTransport::pair`] themselves and hand one end to
    /// [`Port::handshake`].
    pub(crate) fn connect(
        id: u32,
        endpoint: &Endpoint,
        options: &DataSourceOptions,
        requested_master_id: MasterId,
        requested_slave_id: i32,
    ) -> Result<Self> {
        match endpoint {
            Endpoint::Remote { host, port } => {
                let transport = RemoteTransport::connect(
                    host,
                    *port,
                    options.family,
                    options.tcp_keep_alive,
                    options.connect_timeout,
                )?;
                Self::handshake(
                    id,
                    AnyTransport::Remote(transport),
                    requested_master_id,
                    requested_slave_id,
                )
            }
            Endpoint::Local => Err(ErrorKind::NotSupported {
                message: "a Local endpoint requires a pre-built LocalTransport pair".to_string(),
            }
            .into()),
            #[cfg(test)]
            Endpoint::LocalListener(listener) => Self::handshake(
                id,
                AnyTransport::Local(listener.connect()),
                requested_master_id,
                requested_slave_id,
            ),
        }
    }

    /// Performs the Master-ID/SlaveID handshake over an already-connected
    /// transport: write the requested `MasterId` word followed by
    /// `requested_slave_id`, then read back the word and `SlaveID` the
    /// server agreed to.
    pub(crate) fn handshake(
        id: u32,
        transport: AnyTransport,
        requested_master_id: MasterId,
        requested_slave_id: i32,
    ) -> Result<Self> {
        let mut channel = FramedChannel::new(transport);

        channel.write_integer(requested_master_id.encode())?;
        channel.write_integer(requested_slave_id)?;
        channel.flush()?;

        let agreed_word = channel.read_integer().map_err(|_| {
            Error::from(ErrorKind::HandshakeFailed {
                message: "did not receive an agreed Master-ID word".to_string(),
            })
        })?;
        let slave_id = channel.read_integer().map_err(|_| {
            Error::from(ErrorKind::HandshakeFailed {
                message: "did not receive an assigned SlaveID".to_string(),
            })
        })?;

        Ok(Self {
            id,
            channel,
            slave_id,
            worker_id: None,
            master_id: MasterId::decode(agreed_word),
            reuse: false,
        })
    }

    pub(crate) fn id(&self) -> u32 {
        self.id
    }

    pub(crate) fn slave_id(&self) -> i32 {
        self.slave_id
    }

    pub(crate) fn worker_id(&self) -> Option<i32> {
        self.worker_id
    }

    pub(crate) fn set_worker_id(&mut self, worker_id: Option<i32>) {
        self.worker_id = worker_id;
    }

    pub(crate) fn master_id(&self) -> MasterId {
        self.master_id
    }

    pub(crate) fn is_reuse(&self) -> bool {
        self.reuse
    }

    pub(crate) fn set_reuse(&mut self, reuse: bool) {
        self.reuse = reuse;
    }

    /// Clears the reuse flag before a `Port` goes back into the pool, so the
    /// next checkout doesn't mistake leftover state from the previous
    /// session for its own (`spec.md` §4.3).
    pub(crate) fn reset(&mut self) {
        self.reuse = false;
        self.worker_id = None;
    }

    /// One round-trip confirming the peer is still alive and willing to
    /// reuse this `Port`'s underlying connection for a new worker — the
    /// "sync frame" step of `beginWorker` (`spec.md` §4.4).
    pub(crate) fn sync(&mut self) -> Result<()> {
        self.write_integer(self.slave_id)?;
        self.flush()?;
        let echoed = self.read_integer()?;
        if echoed != self.slave_id {
            return Err(ErrorKind::HandshakeFailed {
                message: format!(
                    "sync echoed SlaveID {echoed}, expected {}",
                    self.slave_id
                ),
            }
            .into());
        }
        Ok(())
    }

    /// Every fallible operation on the underlying channel passes through
    /// here so the reuse-flag tracks the *last* outcome on this `Port`
    /// (`spec.md` §3: "After a failed request, reusable only if the server
    /// tagged the error as user-level"). A transport- or protocol-level
    /// error (anything that isn't a server `ErrorLevel::User` exception)
    /// always clears it, even if a previous request had set it.
    fn note<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.reuse = e.is_user_level();
        }
        result
    }

    pub(crate) fn write_integer(&mut self, value: i32) -> Result<()> {
        let result = self.channel.write_integer(value);
        self.note(result)
    }

    pub(crate) fn read_integer(&mut self) -> Result<i32> {
        let result = self.channel.read_integer();
        self.note(result)
    }

    pub(crate) fn write_object(&mut self, value: &Value) -> Result<()> {
        let result = self.channel.write_object(value);
        self.note(result)
    }

    pub(crate) fn read_object(&mut self) -> Result<Option<Value>> {
        let result = self.channel.read_object();
        self.note(result)
    }

    pub(crate) fn wait(&mut self, timeout: Option<Duration>) -> Result<bool> {
        self.channel.wait(timeout)
    }

    pub(crate) fn flush(&mut self) -> Result<()> {
        let result = self.channel.flush();
        self.note(result)
    }

    pub(crate) fn close(&mut self) {
        self.channel.close();
    }
}
