//! `Session` (`spec.md` §4.6): one authenticated SQL session, multiplexed
//! over whichever worker `Port` a statement happens to land on.
//!
//! Grounded on `mongodb::ClientSession`: a cheap handle around a shared,
//! `Mutex`-guarded id cell so `close()` is idempotent under concurrent
//! callers (`spec.md` §5, "a session's `close` takes the session's own
//! latch before touching its SessionID").

use std::sync::{Arc, Mutex};

use crate::datasource::DataSourceInner;
use crate::error::{ErrorKind, Result};
use crate::port::Port;
use crate::prepare::{PrepareScope, PrepareStatement};
use crate::protocol::{AuthorizationMode, RequestCode, Value};
use crate::result_set::ResultSet;

/// Shared, registry-visible session state. `DataSourceInner` keeps a `Weak`
/// to this so `DataSource::close` can notify live sessions without keeping
/// them alive past their last `Session` handle.
pub(crate) struct SessionState {
    id: Mutex<i32>,
    database_name: String,
}

impl SessionState {
    pub(crate) fn new(id: i32, database_name: String) -> Self {
        Self {
            id: Mutex::new(id),
            database_name,
        }
    }

    fn id(&self) -> i32 {
        *self.id.lock().unwrap()
    }

    fn take_id(&self) -> i32 {
        std::mem::replace(&mut *self.id.lock().unwrap(), 0)
    }
}

/// One authenticated SQL session (`spec.md` §3, §4.6).
#[derive(Clone)]
pub struct Session {
    inner: Arc<DataSourceInner>,
    state: Arc<SessionState>,
}

impl Session {
    pub(crate) fn new(inner: Arc<DataSourceInner>, state: Arc<SessionState>) -> Self {
        Self { inner, state }
    }

    /// `isValid()`: the session's server-assigned ID is nonzero.
    pub fn is_valid(&self) -> bool {
        self.state.id() != 0
    }

    /// `executeStatement(sql, params)` (`spec.md` §4.6): acquires a worker
    /// `Port`, sends the request, and hands the still-streaming `Port` to a
    /// new `ResultSet` without reading any response frame here.
    pub fn execute_statement(&self, sql: &str, params: &[Value]) -> Result<ResultSet> {
        self.require_valid()?;
        let worker = self.inner.checkout_worker()?;
        let mut port = worker.port;

        match send_execute(&mut port, RequestCode::ExecuteStatement, self.state.id(), sql, None, params) {
            Ok(()) => Ok(ResultSet::new(self.inner.clone(), port, worker.worker_id)),
            Err(e) => {
                self.inner.release_worker(port, true);
                Err(e)
            }
        }
    }

    /// `executePrepareStatement(ps, params)`: same shape, `ExecutePrepare`
    /// with the `PrepareID` in place of raw SQL.
    pub fn execute_prepare_statement(&self, statement: &PrepareStatement, params: &[Value]) -> Result<ResultSet> {
        self.require_valid()?;
        let worker = self.inner.checkout_worker()?;
        let mut port = worker.port;

        match send_execute(
            &mut port,
            RequestCode::ExecutePrepare,
            self.state.id(),
            "",
            Some(statement.prepare_id()),
            params,
        ) {
            Ok(()) => Ok(ResultSet::new(self.inner.clone(), port, worker.worker_id)),
            Err(e) => {
                self.inner.release_worker(port, true);
                Err(e)
            }
        }
    }

    /// `createPrepareStatement(sql)`, session-scoped (`spec.md` §4.6): uses
    /// `PrepareStatement2` when the negotiated Master-ID is v3 or later,
    /// else falls back to the DataSource-wide `PrepareStatement` request
    /// (`spec.md` §8 S6).
    pub fn create_prepare_statement(&self, sql: &str) -> Result<PrepareStatement> {
        self.require_valid()?;
        let worker = self.inner.checkout_worker()?;
        let mut port = worker.port;

        let use_v2 = self.inner.negotiated_master_id().protocol_version >= 3;
        let result = if use_v2 {
            crate::prepare::create_session_scope(&mut port, self.state.id(), sql)
        } else {
            crate::prepare::create_data_source_scope(&mut port, &self.state.database_name, sql)
        };

        match result {
            Ok(prepare_id) => {
                self.inner.release_worker(port, false);
                let scope = if use_v2 {
                    PrepareScope::Session {
                        session_id: self.state.id(),
                    }
                } else {
                    PrepareScope::DataSource {
                        database_name: self.state.database_name.clone(),
                    }
                };
                Ok(PrepareStatement::new(self.inner.clone(), scope, prepare_id))
            }
            Err(e) => {
                self.inner.release_worker(port, true);
                Err(e)
            }
        }
    }

    /// `close()`: idempotent (`spec.md` §8 invariant 7). Sends `EndSession`
    /// on a worker `Port` the first time only.
    pub fn close(&self) {
        close_session_state(&self.inner, &self.state);
    }

    fn require_valid(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(ErrorKind::SessionNotAvailable.into())
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // `Arc::strong_count` also counts `self`; a lone final handle drops
        // to 1 right before this runs, so >1 means another `Session` clone
        // (or the registry's `Weak`, which never contributes) still exists.
        if Arc::strong_count(&self.state) <= 1 {
            self.close();
        }
    }
}

/// Ends `state`'s session if it hasn't been ended already, used both by
/// `Session::close` and by `DataSourceInner::close` when tearing down every
/// live session.
pub(crate) fn close_session_state(inner: &DataSourceInner, state: &Arc<SessionState>) {
    let session_id = state.take_id();
    if session_id == 0 {
        return;
    }

    let worker = match inner.checkout_worker() {
        Ok(w) => w,
        Err(e) => {
            log::warn!("could not acquire a worker to end session {session_id}: {e}");
            return;
        }
    };
    let mut port = worker.port;

    let result = (|| -> Result<()> {
        port.write_object(&Value::Integer(RequestCode::EndSession as i32))?;
        port.write_object(&Value::Integer(session_id))?;
        port.flush()?;
        crate::protocol_util::read_status(&mut port)
    })();

    match result {
        Ok(()) => inner.release_worker(port, false),
        Err(e) => {
            log::warn!("EndSession failed for session {session_id}: {e}");
            inner.release_worker(port, true);
        }
    }
}

/// Issues `BeginSession`/`BeginSession2` on a freshly acquired worker `Port`
/// and returns the server-assigned `SessionID` (`spec.md` §4.5 step 3).
pub(crate) fn begin_session(
    port: &mut Port,
    database_name: &str,
    credentials: Option<(&str, &str)>,
) -> Result<i32> {
    let (code, auth) = match credentials {
        Some(_) => (RequestCode::BeginSession2, AuthorizationMode::Password),
        None => (RequestCode::BeginSession, AuthorizationMode::None),
    };

    port.write_object(&Value::Integer(code as i32))?;
    port.write_object(&Value::String(database_name.to_string()))?;
    if let (AuthorizationMode::Password, Some((user, password))) = (auth, credentials) {
        port.write_object(&Value::String(user.to_string()))?;
        port.write_object(&Value::String(password.to_string()))?;
    }
    port.flush()?;

    let session_id = crate::protocol_util::read_value(port)?.into_integer()?;
    crate::protocol_util::read_status(port)?;
    Ok(session_id)
}

fn send_execute(
    port: &mut Port,
    code: RequestCode,
    session_id: i32,
    sql: &str,
    prepare_id: Option<i32>,
    params: &[Value],
) -> Result<()> {
    port.write_object(&Value::Integer(code as i32))?;
    port.write_object(&Value::Integer(session_id))?;
    match prepare_id {
        Some(id) => port.write_object(&Value::Integer(id))?,
        None => port.write_object(&Value::String(sql.to_string()))?,
    }
    port.write_object(&Value::DataArray(params.to_vec()))?;
    port.flush()
}
