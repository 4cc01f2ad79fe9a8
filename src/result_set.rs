//! `ResultSet` (`spec.md` §3, §4.6): a streaming cursor over one
//! statement's reply frames, exclusively owning the worker `Port` it was
//! handed until drained, cancelled, or dropped.

use std::sync::Arc;

use crate::datasource::DataSourceInner;
use crate::error::{ErrorKind, Result};
use crate::port::Port;
use crate::protocol::{ColumnMetaData, StatusCode, Value};

/// `spec.md` §4.6's state machine. `Undefined` only appears before the
/// first frame is read in a strict reading of the table; this crate starts
/// straight at `Data` (the table's own "Initial = Data").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Data,
    MetaData,
    EndOfData,
    Success,
    Canceled,
    Error,
}

impl State {
    fn is_terminal(self) -> bool {
        matches!(self, State::Success | State::Canceled | State::Error)
    }
}

/// One streamed reply to `execute_statement`/`execute_prepare_statement`.
pub struct ResultSet {
    inner: Arc<DataSourceInner>,
    port: Option<Port>,
    worker_id: i32,
    state: State,
    metadata: Option<Vec<ColumnMetaData>>,
}

impl ResultSet {
    pub(crate) fn new(inner: Arc<DataSourceInner>, port: Port, worker_id: i32) -> Self {
        Self {
            inner,
            port: Some(port),
            worker_id,
            state: State::Data,
            metadata: None,
        }
    }

    /// Column metadata observed so far. Populated once a `ResultSetMetaData`
    /// frame has been read; remains available after cancellation.
    pub fn metadata(&self) -> Option<&[ColumnMetaData]> {
        self.metadata.as_deref()
    }

    /// `true` once this `ResultSet` has reached a terminal state and its
    /// `Port` has been returned to the pool or closed.
    pub fn is_done(&self) -> bool {
        self.port.is_none()
    }

    /// Reads frames until the next tuple, terminal status, or a server
    /// exception. Returns `Ok(None)` once the stream is exhausted; after
    /// that, further calls return `Ok(None)` immediately.
    pub fn next_tuple(&mut self) -> Result<Option<Vec<Value>>> {
        loop {
            let Some(port) = self.port.as_mut() else {
                return Ok(None);
            };

            if self.state.is_terminal() {
                return Ok(None);
            }

            match port.read_object() {
                Ok(Some(Value::ResultSetMetaData(columns))) => {
                    self.metadata = Some(columns);
                    self.state = State::MetaData;
                }
                Ok(Some(Value::DataArray(tuple))) => {
                    self.state = State::Data;
                    return Ok(Some(tuple));
                }
                Ok(Some(Value::Status(StatusCode::HasMoreData))) => {
                    self.state = State::Data;
                }
                Ok(Some(Value::Status(StatusCode::Success))) => {
                    self.state = State::Success;
                    self.release(true);
                    return Ok(None);
                }
                Ok(Some(Value::Status(StatusCode::Canceled))) => {
                    self.state = State::Canceled;
                    self.release(false);
                    return Ok(None);
                }
                Ok(Some(other)) => {
                    self.state = State::Error;
                    self.release(false);
                    return Err(ErrorKind::Unexpected {
                        message: format!("unexpected frame in result set stream: {other:?}"),
                    }
                    .into());
                }
                Ok(None) => {
                    self.state = State::EndOfData;
                }
                Err(e) => {
                    self.state = State::Error;
                    self.release(false);
                    return Err(e);
                }
            }
        }
    }

    /// `ResultSet.cancel()` (`spec.md` §4.6, §5): sends `CancelWorker` over
    /// a control connection, never the owned `Port` (which may be blocked
    /// streaming). Advisory and best-effort — failures are logged, not
    /// propagated (`spec.md` §7).
    pub fn cancel(&self) {
        if self.is_done() {
            return;
        }
        if let Err(e) = self.inner.cancel_worker(self.worker_id) {
            log::warn!("CancelWorker failed (advisory, ignored): {e}");
        }
    }

    /// Drives the state machine to a terminal state, discarding any
    /// remaining tuples, then returns the `Port` to the pool (on `Success`)
    /// or closes it. Idempotent (`spec.md` §8 invariant 7).
    pub fn close(&mut self) {
        if self.is_done() {
            return;
        }

        if !self.state.is_terminal() {
            self.cancel();
        }

        while !self.is_done() {
            match self.next_tuple() {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(_) => break,
            }
        }
    }

    fn release(&mut self, succeeded: bool) {
        if let Some(port) = self.port.take() {
            self.inner.release_stream_port(port, succeeded);
        }
    }
}

impl Drop for ResultSet {
    fn drop(&mut self) {
        self.close();
    }
}
