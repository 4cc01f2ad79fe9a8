//! Pool lifecycle events (`spec.md` §7, "ambient" logging layer from
//! `SPEC_FULL.md` §2). Modeled directly on
//! `mongodb::event::cmap::CmapEventHandler`: a `Send + Sync` trait with a
//! no-op default for every event, so a caller only overrides what it wants
//! to observe, without tying the crate to a particular metrics backend.

/// A `Port` was opened, whether brand-new or reused from the pool.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct PortOpenedEvent {
    pub port_id: u32,
    pub slave_id: i32,
}

/// A `Port` was torn down.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct PortClosedEvent {
    pub port_id: u32,
    pub slave_id: i32,
    pub reason: PortClosedReason,
}

/// Why a `Port` stopped being tracked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum PortClosedReason {
    /// The owning request completed and the server tagged any error
    /// (if there was one) as non-reusable.
    NotReusable,
    /// The reaper evicted it to stay within `MaximumConnectionPoolCount`.
    ReaperEvicted,
    /// The client unilaterally expunged it (`NoReuseConnection`).
    Expunged,
    /// The owning `DataSource` was closed.
    DataSourceClosed,
}

/// A new control connection was spawned because the session-per-connection
/// threshold was crossed (`spec.md` §4.5 step 5).
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct ControlConnectionSpawnedEvent {
    pub total_control_connections: usize,
}

/// One reaper tick completed.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct ReaperTickEvent {
    pub evicted: usize,
    pub reported_to_server: usize,
}

/// Implement this to observe `DataSource` pool lifecycle events. Every
/// method has a no-op default, matching `CmapEventHandler`'s shape, so
/// implementers override only what they need.
pub trait PoolEventHandler: Send + Sync {
    fn handle_port_opened_event(&self, _event: PortOpenedEvent) {}
    fn handle_port_closed_event(&self, _event: PortClosedEvent) {}
    fn handle_control_connection_spawned_event(&self, _event: ControlConnectionSpawnedEvent) {}
    fn handle_reaper_tick_event(&self, _event: ReaperTickEvent) {}
}
