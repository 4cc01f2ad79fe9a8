//! Control connection (`spec.md` §4.3-§4.5): a long-lived `Port` reserved
//! for meta-requests, serialised behind the "PortLatch" so a request and its
//! entire response are atomic (`spec.md` §5, "Per control connection:
//! requests are serialised by a mutex").

use std::sync::Mutex;

use crate::error::{Error, ErrorKind, Result};
use crate::options::{DataSourceOptions, Endpoint};
use crate::port::Port;
use crate::protocol::{MasterId, RequestCode, Target, Value, SLAVE_ID_ANY};
use crate::protocol_util::{read_status, read_value};

/// Result of a successful `beginWorker` exchange (`spec.md` §4.4): the
/// worker `Port`, ready to carry one statement, plus the `WorkerID` needed
/// to cancel it later.
pub(crate) struct WorkerHandle {
    pub(crate) port: Port,
    pub(crate) worker_id: i32,
}

/// `beginWorker` failure that also reports whether a caller-supplied pooled
/// `Port` survived the attempt, so the caller can apply `spec.md` §4.4 step
/// 5 ("if the port is reusable return it to the pool, else close it")
/// instead of the port being silently dropped.
pub(crate) struct BeginWorkerError {
    pub(crate) error: Error,
    pub(crate) recovered_port: Option<Port>,
}

impl From<BeginWorkerError> for Error {
    fn from(e: BeginWorkerError) -> Self {
        e.error
    }
}

/// One control connection: a `Port` plus the latch serialising every
/// meta-request over it.
pub(crate) struct ControlConnection {
    port: Mutex<Port>,
}

impl ControlConnection {
    /// Opens a brand-new control connection and performs the
    /// `BeginConnection` handshake (`spec.md` §4.5 step 3).
    pub(crate) fn open(
        id: u32,
        endpoint: &Endpoint,
        options: &DataSourceOptions,
        master_id: MasterId,
        client_host_name: Option<&str>,
    ) -> Result<Self> {
        let mut port = Port::connect(id, endpoint, options, master_id, SLAVE_ID_ANY)?;

        port.write_object(&Value::Integer(RequestCode::BeginConnection as i32))?;
        if let Some(name) = client_host_name {
            port.write_object(&Value::String(name.to_string()))?;
        }
        port.flush()?;
        read_status(&mut port)?;

        Ok(Self {
            port: Mutex::new(port),
        })
    }

    /// Issues `BeginWorker`, following the five-step protocol of
    /// `spec.md` §4.4:
    ///
    /// 1. Send the pooled port's `SlaveID` if the caller supplied one via
    ///    `pooled`, else `Any`.
    /// 2. Receive the server-assigned `SlaveID`, a fresh `WorkerID`, `Status`.
    /// 3. If `Any` was sent, open a brand-new `Port` bound to the returned
    ///    `SlaveID`; otherwise synchronise (one sync frame) on `pooled`.
    /// 4. Stamp the `WorkerID` onto the resulting `Port`.
    ///
    /// Step 5 (closing/pooling the port on a thrown exception between steps
    /// 1 and 3) is the caller's responsibility: this method never silently
    /// drops `pooled` — on early return it is handed back unchanged so the
    /// caller can decide based on its own reuse-flag.
    pub(crate) fn begin_worker(
        &self,
        endpoint: &Endpoint,
        options: &DataSourceOptions,
        new_port_id: u32,
        master_id: MasterId,
        pooled: Option<Port>,
    ) -> std::result::Result<WorkerHandle, BeginWorkerError> {
        let requested_slave_id = pooled
            .as_ref()
            .map(|p| p.slave_id())
            .unwrap_or(SLAVE_ID_ANY);

        match self.negotiate_worker(endpoint, options, new_port_id, master_id, requested_slave_id, pooled) {
            Ok(handle) => Ok(handle),
            Err((error, recovered_port)) => Err(BeginWorkerError {
                error,
                recovered_port,
            }),
        }
    }

    /// Does the actual I/O for [`Self::begin_worker`], returning the
    /// recoverable pooled `Port` alongside any error so the caller doesn't
    /// have to unpick it from a partially consumed `Option`.
    fn negotiate_worker(
        &self,
        endpoint: &Endpoint,
        options: &DataSourceOptions,
        new_port_id: u32,
        master_id: MasterId,
        requested_slave_id: i32,
        mut pooled: Option<Port>,
    ) -> std::result::Result<WorkerHandle, (Error, Option<Port>)> {
        let exchange = || -> Result<(i32, i32)> {
            let mut control = self.port.lock().unwrap();
            control.write_object(&Value::Integer(RequestCode::BeginWorker as i32))?;
            control.write_object(&Value::Integer(requested_slave_id))?;
            control.flush()?;

            let slave_id = read_value(&mut control)?.into_integer()?;
            let worker_id = read_value(&mut control)?.into_integer()?;
            read_status(&mut control)?;
            Ok((slave_id, worker_id))
        };

        let (slave_id, worker_id) = match exchange() {
            Ok(pair) => pair,
            Err(e) => return Err((e, pooled.take())),
        };

        let mut port = if requested_slave_id == SLAVE_ID_ANY {
            match Port::connect(new_port_id, endpoint, options, master_id, slave_id) {
                Ok(p) => p,
                Err(e) => return Err((e, pooled.take())),
            }
        } else {
            let mut reused = match pooled.take() {
                Some(p) => p,
                None => {
                    return Err((
                        ErrorKind::Unexpected {
                            message:
                                "beginWorker reused a SlaveID without a pooled port on hand"
                                    .to_string(),
                        }
                        .into(),
                        None,
                    ))
                }
            };
            if let Err(e) = reused.sync() {
                return Err((e, Some(reused)));
            }
            reused
        };

        port.set_worker_id(Some(worker_id));
        Ok(WorkerHandle { port, worker_id })
    }

    pub(crate) fn cancel_worker(&self, worker_id: i32) -> Result<()> {
        let mut control = self.port.lock().unwrap();
        control.write_object(&Value::Integer(RequestCode::CancelWorker as i32))?;
        control.write_object(&Value::Integer(worker_id))?;
        control.flush()?;
        read_status(&mut control)
    }

    fn end_connection(&self) -> Result<()> {
        let mut control = self.port.lock().unwrap();
        control.write_object(&Value::Integer(RequestCode::EndConnection as i32))?;
        control.flush()?;
        read_status(&mut control)
    }

    pub(crate) fn no_reuse_connection(&self, slave_ids: &[i32]) -> Result<()> {
        let mut control = self.port.lock().unwrap();
        control.write_object(&Value::Integer(RequestCode::NoReuseConnection as i32))?;
        control.write_object(&Value::IntegerArray(slave_ids.to_vec()))?;
        control.flush()?;
        read_status(&mut control)
    }

    pub(crate) fn erase_prepare_statement(
        &self,
        database_name: &str,
        prepare_id: i32,
    ) -> Result<()> {
        let mut control = self.port.lock().unwrap();
        control.write_object(&Value::Integer(RequestCode::ErasePrepareStatement as i32))?;
        control.write_object(&Value::String(database_name.to_string()))?;
        control.write_object(&Value::Integer(prepare_id))?;
        control.flush()?;
        read_status(&mut control)
    }

    pub(crate) fn erase_prepare_statement2(&self, session_id: i32, prepare_id: i32) -> Result<()> {
        let mut control = self.port.lock().unwrap();
        control.write_object(&Value::Integer(RequestCode::ErasePrepareStatement2 as i32))?;
        control.write_object(&Value::Integer(session_id))?;
        control.write_object(&Value::Integer(prepare_id))?;
        control.flush()?;
        read_status(&mut control)
    }

    pub(crate) fn check_availability(&self, target: Target) -> Result<bool> {
        let mut control = self.port.lock().unwrap();
        control.write_object(&Value::Integer(RequestCode::CheckAvailability as i32))?;
        control.write_object(&Value::Integer(target.code()))?;
        if let Target::Database(Some(db_id)) = target {
            control.write_object(&Value::UnsignedInteger(db_id))?;
        }
        control.flush()?;

        let available = read_value(&mut control)?.into_integer()? != 0;
        read_status(&mut control)?;
        Ok(available)
    }

    pub(crate) fn shutdown(&self, credentials: Option<(&str, &str)>) -> Result<()> {
        let mut control = self.port.lock().unwrap();
        let code = if credentials.is_some() {
            RequestCode::Shutdown2
        } else {
            RequestCode::Shutdown
        };
        control.write_object(&Value::Integer(code as i32))?;
        if let Some((user, password)) = credentials {
            control.write_object(&Value::String(user.to_string()))?;
            control.write_object(&Value::String(password.to_string()))?;
        }
        control.flush()?;
        read_status(&mut control)
    }

    /// The Master-ID word this connection's `Port` agreed with the server
    /// during its handshake.
    pub(crate) fn master_id(&self) -> MasterId {
        self.port.lock().unwrap().master_id()
    }

    /// `(port_id, slave_id)` of the underlying `Port`, for event reporting
    /// when the owning `DataSource` tears this connection down.
    pub(crate) fn port_ids(&self) -> (u32, i32) {
        let port = self.port.lock().unwrap();
        (port.id(), port.slave_id())
    }

    /// Sends `EndConnection` and tears down the underlying `Port`.
    /// Exceptions during either step are swallowed (`spec.md` §3, §7 —
    /// "exceptions in teardown are swallowed").
    pub(crate) fn close(&self) {
        if let Err(e) = self.end_connection() {
            log::warn!("EndConnection failed while closing control connection: {e}");
        }
        self.port.lock().unwrap().close();
    }
}
