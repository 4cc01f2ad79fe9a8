//! `DataSource` (`spec.md` §4.5): process-level owner of the control
//! connection array, port pool, session registry and negotiated protocol
//! state. Entry point for `create_session`, `create_prepare_statement`,
//! `close`, and the availability queries.
//!
//! Grounded on `mongodb::Client`/`cmap::ConnectionPool`: an `Arc`-shared
//! inner struct reached through a cheap-to-clone handle, with a background
//! reaper holding only a `Weak` reference to it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use crate::control::{BeginWorkerError, ControlConnection, WorkerHandle};
use crate::error::{Error, ErrorKind, Result};
use crate::event::{
    ControlConnectionSpawnedEvent, PortClosedEvent, PortClosedReason, PortOpenedEvent, ReaperTickEvent,
};
use crate::id_allocator::IdAllocator;
use crate::options::{DataSourceOptions, Endpoint};
use crate::pool::PortPool;
use crate::port::Port;
use crate::prepare::{PrepareScope, PrepareStatement};
use crate::protocol::{AuthorizationMode, MasterId, Target};
use crate::reaper::Reaper;
use crate::session::{Session, SessionState};

struct OpenState {
    /// Number of outstanding `open()` calls not yet matched by `close()`.
    counter: u32,
    /// The Master-ID the first control connection negotiated with the
    /// server; `0` bits everywhere until the first successful `open`.
    master_id: MasterId,
}

/// Shared state behind every [`crate::DataSource`] handle.
pub(crate) struct DataSourceInner {
    endpoint: Endpoint,
    options: DataSourceOptions,
    requested_protocol_version: u16,
    open_state: Mutex<OpenState>,
    control_connections: RwLock<Vec<Arc<ControlConnection>>>,
    round_robin: AtomicUsize,
    pool: PortPool,
    sessions: Mutex<Vec<Weak<SessionState>>>,
    port_ids: IdAllocator,
    control_ids: IdAllocator,
    reaper: Mutex<Option<Reaper>>,
    self_weak: Weak<DataSourceInner>,
    create_session_latch: Mutex<()>,
}

/// Client-side handle representing one server endpoint (`spec.md` GLOSSARY).
///
/// Cheap to clone: internally an `Arc` around the shared pool/session state,
/// matching how `mongodb::Client` is handed around the application.
#[derive(Clone)]
pub struct DataSource {
    inner: Arc<DataSourceInner>,
}

impl DataSource {
    /// Creates a `DataSource` bound to `endpoint` and performs `spec.md`
    /// §4.5's `open(protocolVersion)`: establishes the first control
    /// connection, negotiates the Master-ID, and starts the reaper.
    pub fn open(endpoint: Endpoint, protocol_version: u16, options: DataSourceOptions) -> Result<Self> {
        let inner = Arc::new_cyclic(|weak| DataSourceInner {
            endpoint,
            options,
            requested_protocol_version: protocol_version,
            open_state: Mutex::new(OpenState {
                counter: 0,
                master_id: MasterId::new(protocol_version),
            }),
            control_connections: RwLock::new(Vec::new()),
            round_robin: AtomicUsize::new(0),
            pool: PortPool::new(),
            sessions: Mutex::new(Vec::new()),
            port_ids: IdAllocator::new(),
            control_ids: IdAllocator::new(),
            reaper: Mutex::new(None),
            self_weak: weak.clone(),
            create_session_latch: Mutex::new(()),
        });

        inner.ensure_open()?;
        Ok(Self { inner })
    }

    /// `createSession(db[, user, password])` (`spec.md` §4.5).
    pub fn create_session(
        &self,
        database_name: impl Into<String>,
        credentials: Option<(&str, &str)>,
    ) -> Result<Session> {
        self.inner.create_session(database_name.into(), credentials)
    }

    /// `createPrepareStatement` issued directly on the `DataSource`
    /// (DataSource-wide scope, used when no `Session` is in hand).
    pub fn create_prepare_statement(&self, database_name: impl Into<String>, sql: &str) -> Result<PrepareStatement> {
        self.inner.create_prepare_statement(database_name.into(), sql)
    }

    /// `CheckAvailability` against the server itself.
    pub fn is_server_available(&self) -> Result<bool> {
        self.inner.check_availability(Target::Server)
    }

    /// `CheckAvailability` against a specific database (or any database, if
    /// `database_id` is `None`).
    pub fn is_database_available(&self, database_id: Option<u32>) -> Result<bool> {
        self.inner.check_availability(Target::Database(database_id))
    }

    /// `Shutdown`/`Shutdown2` (`spec.md` §4.4).
    pub fn shutdown(&self, credentials: Option<(&str, &str)>) -> Result<()> {
        let control = self.inner.next_control_connection()?;
        control.shutdown(credentials)
    }

    /// `close()` (`spec.md` §4.5): idempotent; aborts the reaper, closes
    /// every session, then every control connection, then every pooled
    /// port.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Number of idle `Port`s currently pooled. Exposed for tests asserting
    /// pool-size invariants (`spec.md` §8, scenario S1).
    #[cfg(test)]
    pub(crate) fn idle_pool_count(&self) -> usize {
        self.inner.idle_pool_count()
    }
}

impl DataSourceInner {
    fn ensure_open(&self) -> Result<()> {
        let mut open_state = self.open_state.lock().unwrap();
        if open_state.counter > 0 {
            open_state.counter += 1;
            return Ok(());
        }

        let mut requested_master_id = MasterId::new(self.requested_protocol_version);
        if requested_master_id.authorization_mode == AuthorizationMode::None {
            requested_master_id.authorization_mode = AuthorizationMode::Password;
        }

        let control_id = self.control_ids.next()?;
        let control = ControlConnection::open(
            control_id,
            &self.endpoint,
            &self.options,
            requested_master_id,
            Some(&client_host_name()),
        )?;

        open_state.master_id = control.master_id();
        open_state.counter = 1;

        self.control_connections.write().unwrap().push(Arc::new(control));
        drop(open_state);

        let reaper = Reaper::spawn(
            self.self_weak.clone(),
            self.options.reaper_ticks(),
            self.options.time_unit,
        );
        *self.reaper.lock().unwrap() = Some(reaper);

        Ok(())
    }

    pub(crate) fn close(&self) {
        let mut open_state = self.open_state.lock().unwrap();
        if open_state.counter == 0 {
            return;
        }
        open_state.counter = 0;
        drop(open_state);

        if let Some(mut reaper) = self.reaper.lock().unwrap().take() {
            reaper.stop();
        }

        let sessions = std::mem::take(&mut *self.sessions.lock().unwrap());
        for session in sessions.into_iter().filter_map(|s| s.upgrade()) {
            crate::session::close_session_state(self, &session);
        }

        let connections = std::mem::take(&mut *self.control_connections.write().unwrap());
        for connection in connections {
            let (port_id, slave_id) = connection.port_ids();
            connection.close();
            self.emit_port_closed(port_id, slave_id, PortClosedReason::DataSourceClosed);
        }

        while let Some(mut port) = self.pool.pop() {
            let (port_id, slave_id) = (port.id(), port.slave_id());
            port.close();
            self.emit_port_closed(port_id, slave_id, PortClosedReason::DataSourceClosed);
        }
    }

    pub(crate) fn negotiated_master_id(&self) -> MasterId {
        self.open_state.lock().unwrap().master_id
    }

    /// Number of idle `Port`s currently pooled. Exposed for tests asserting
    /// pool-size invariants (`spec.md` §8, scenario S1).
    #[cfg(test)]
    pub(crate) fn idle_pool_count(&self) -> usize {
        self.pool.idle_count()
    }

    pub(crate) fn next_control_connection(&self) -> Result<Arc<ControlConnection>> {
        let connections = self.control_connections.read().unwrap();
        if connections.is_empty() {
            return Err(ErrorKind::NotInitialized.into());
        }
        let index = self.round_robin.fetch_add(1, Ordering::Relaxed) % connections.len();
        Ok(connections[index].clone())
    }

    /// `beginWorker` on any control connection, reusing a pooled `Port`
    /// when one is idle (`spec.md` §4.4).
    pub(crate) fn checkout_worker(&self) -> std::result::Result<WorkerHandle, Error> {
        let pooled = self.pool.pop();
        let control = self.next_control_connection()?;
        let port_id = self.port_ids.next()?;
        let master_id = self.negotiated_master_id();

        match control.begin_worker(&self.endpoint, &self.options, port_id, master_id, pooled) {
            Ok(handle) => {
                self.emit_port_opened(handle.port.id(), handle.port.slave_id());
                Ok(handle)
            }
            Err(BeginWorkerError { error, recovered_port }) => {
                if let Some(port) = recovered_port {
                    self.release_worker(port, true);
                }
                Err(error)
            }
        }
    }

    fn emit_port_opened(&self, port_id: u32, slave_id: i32) {
        if let Some(handler) = &self.options.event_handler {
            handler.handle_port_opened_event(PortOpenedEvent { port_id, slave_id });
        }
    }

    /// Returns a worker `Port` after use: on success (`failed == false`)
    /// it is unconditionally pooled; on failure, pooled only if its
    /// reuse-flag says a server `User`-level error (or nothing) occurred
    /// (`spec.md` §4.7).
    pub(crate) fn release_worker(&self, mut port: Port, failed: bool) {
        if failed && !port.is_reuse() {
            let slave_id = port.slave_id();
            let port_id = port.id();
            port.close();
            self.emit_port_closed(port_id, slave_id, PortClosedReason::NotReusable);
            return;
        }

        if let Some((mut leftover, was_expunged)) = self.pool.push(port, self.options.max_pool_count) {
            let slave_id = leftover.slave_id();
            let port_id = leftover.id();
            leftover.close();
            let reason = if was_expunged {
                PortClosedReason::Expunged
            } else {
                PortClosedReason::NotReusable
            };
            self.emit_port_closed(port_id, slave_id, reason);
        }
    }

    /// Returns a `ResultSet`'s worker `Port` after it reached a terminal
    /// state (`spec.md` §4.6): pooled unconditionally on `Success`, closed
    /// unconditionally otherwise — unlike [`Self::release_worker`], this
    /// does not consult the reuse-flag, matching the streaming-request rule
    /// in §4.6 rather than the non-streaming one in §4.7.
    pub(crate) fn release_stream_port(&self, mut port: Port, to_pool: bool) {
        if !to_pool {
            let slave_id = port.slave_id();
            let port_id = port.id();
            port.close();
            self.emit_port_closed(port_id, slave_id, PortClosedReason::NotReusable);
            return;
        }

        if let Some((mut leftover, was_expunged)) = self.pool.push(port, self.options.max_pool_count) {
            let slave_id = leftover.slave_id();
            let port_id = leftover.id();
            leftover.close();
            let reason = if was_expunged {
                PortClosedReason::Expunged
            } else {
                PortClosedReason::NotReusable
            };
            self.emit_port_closed(port_id, slave_id, reason);
        }
    }

    fn emit_port_closed(&self, port_id: u32, slave_id: i32, reason: PortClosedReason) {
        if let Some(handler) = &self.options.event_handler {
            handler.handle_port_closed_event(PortClosedEvent {
                port_id,
                slave_id,
                reason,
            });
        }
    }

    fn create_session(
        self: &Arc<Self>,
        database_name: String,
        credentials: Option<(&str, &str)>,
    ) -> Result<Session> {
        let _serialize = self.create_session_latch.lock().unwrap();

        let worker = match self.checkout_worker() {
            Ok(w) => w,
            Err(e) if e.is_connection_failure() && self.sessions.lock().unwrap().is_empty() => {
                self.close();
                match self.ensure_open() {
                    Ok(()) => self.checkout_worker()?,
                    // Chain the reopen failure onto the dead-connection error that
                    // triggered it, so a caller sees why the reopen was attempted.
                    Err(reopen_err) => return Err(Error::with_source(*reopen_err.kind, e)),
                }
            }
            Err(e) => return Err(e),
        };

        let mut port = worker.port;
        match crate::session::begin_session(&mut port, &database_name, credentials) {
            Ok(session_id) => {
                self.release_worker(port, false);
                let state = Arc::new(SessionState::new(session_id, database_name));
                self.sessions.lock().unwrap().push(Arc::downgrade(&state));
                self.maybe_spawn_control_connection()?;
                Ok(Session::new(self.clone(), state))
            }
            Err(e) => {
                self.release_worker(port, true);
                Err(e)
            }
        }
    }

    fn maybe_spawn_control_connection(self: &Arc<Self>) -> Result<()> {
        let session_count = self.sessions.lock().unwrap().len() as u32;
        let control_count = self.control_connections.read().unwrap().len() as u32;

        if session_count <= self.options.connection_threshold.saturating_mul(control_count) {
            return Ok(());
        }

        let control_id = self.control_ids.next()?;
        let master_id = self.negotiated_master_id();
        let control = ControlConnection::open(
            control_id,
            &self.endpoint,
            &self.options,
            master_id,
            Some(&client_host_name()),
        )?;

        let mut connections = self.control_connections.write().unwrap();
        connections.push(Arc::new(control));
        let total = connections.len();
        drop(connections);

        if let Some(handler) = &self.options.event_handler {
            handler.handle_control_connection_spawned_event(ControlConnectionSpawnedEvent {
                total_control_connections: total,
            });
        }
        Ok(())
    }

    fn create_prepare_statement(
        self: &Arc<Self>,
        database_name: String,
        sql: &str,
    ) -> Result<PrepareStatement> {
        let worker = self.checkout_worker()?;
        let mut port = worker.port;

        match crate::prepare::create_data_source_scope(&mut port, &database_name, sql) {
            Ok(prepare_id) => {
                self.release_worker(port, false);
                Ok(PrepareStatement::new(
                    self.clone(),
                    PrepareScope::DataSource { database_name },
                    prepare_id,
                ))
            }
            Err(e) => {
                self.release_worker(port, true);
                Err(e)
            }
        }
    }

    fn check_availability(&self, target: Target) -> Result<bool> {
        let control = self.next_control_connection()?;
        control.check_availability(target)
    }

    pub(crate) fn erase_prepare_statement(&self, database_name: &str, prepare_id: i32) {
        if let Ok(control) = self.next_control_connection() {
            if let Err(e) = control.erase_prepare_statement(database_name, prepare_id) {
                log::warn!("best-effort ErasePrepareStatement failed: {e}");
            }
        }
    }

    pub(crate) fn erase_prepare_statement2(&self, session_id: i32, prepare_id: i32) {
        if let Ok(control) = self.next_control_connection() {
            if let Err(e) = control.erase_prepare_statement2(session_id, prepare_id) {
                log::warn!("best-effort ErasePrepareStatement2 failed: {e}");
            }
        }
    }

    pub(crate) fn cancel_worker(&self, worker_id: i32) -> Result<()> {
        let control = self.next_control_connection()?;
        control.cancel_worker(worker_id)
    }

    /// Runs one reaper tick (`spec.md` §4.3): trims surplus idle ports and
    /// tells the server to forget their `SlaveID`s, best-effort.
    pub(crate) fn reap_once(&self) {
        let surplus = self.pool.drain_surplus(self.options.max_pool_count);
        let evicted = surplus.len();
        for mut port in surplus {
            let slave_id = port.slave_id();
            let port_id = port.id();
            port.close();
            self.emit_port_closed(port_id, slave_id, PortClosedReason::ReaperEvicted);
        }

        let to_report = self.pool.take_pending_report();
        let reported = to_report.len();
        if !to_report.is_empty() {
            if let Ok(control) = self.next_control_connection() {
                if let Err(e) = control.no_reuse_connection(&to_report) {
                    log::warn!("NoReuseConnection failed during reaper tick: {e}");
                }
            }
        }

        if let Some(handler) = &self.options.event_handler {
            handler.handle_reaper_tick_event(ReaperTickEvent {
                evicted,
                reported_to_server: reported,
            });
        }
    }
}

fn client_host_name() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string())
}
