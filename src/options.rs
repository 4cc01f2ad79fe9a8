//! Process-wide configurable parameters (`spec.md` §6), modeled on
//! `cmap::options::ConnectionPoolOptions`, which already uses
//! `typed_builder::TypedBuilder` for this kind of all-optional options
//! struct.

use std::sync::Arc;
use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::event::PoolEventHandler;

/// Address family to use (or let the OS choose) when opening a remote
/// transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Family {
    /// Let the platform resolver and `connect` pick.
    #[default]
    Unspecified,
    /// Force IPv4.
    V4,
    /// Force IPv6.
    V6,
}

/// The endpoint a [`crate::DataSource`] connects to.
#[derive(Debug, Clone)]
pub enum Endpoint {
    /// A TCP endpoint, reached through a [`crate::transport::RemoteTransport`].
    Remote { host: String, port: u16 },
    /// An in-process endpoint with no listener bound to it. Exists for API
    /// symmetry; opening it always fails with `NotSupported` since there is
    /// no accepting peer to dial.
    Local,
    /// An in-process endpoint served by a [`crate::transport::LocalListener`]
    /// that a test set up, so every `Port`/control-connection dial — including
    /// the extra ones `beginWorker`/`maybe_spawn_control_connection` open on
    /// demand — lands on the same fake-server harness (`spec.md` §9's
    /// in-process transport, test-only).
    #[cfg(test)]
    LocalListener(std::sync::Arc<crate::transport::LocalListener>),
}

/// Process-wide options governing a [`crate::DataSource`]'s control
/// connections, port pool and reaper thread.
///
/// Every field corresponds to a row of `spec.md` §6's "Configurable
/// parameters" table and carries that table's default.
#[derive(Clone, TypedBuilder)]
pub struct DataSourceOptions {
    /// Sessions-per-control-connection threshold that triggers spawning
    /// another control connection (`ConnectionThreshold`).
    #[builder(default = 20)]
    pub connection_threshold: u32,

    /// Maximum number of idle ports the pool retains (`MaximumConnectionPoolCount`).
    #[builder(default = 10)]
    pub max_pool_count: u32,

    /// Reaper period, floored to multiples of `time_unit` (`CheckConnectionPoolPeriod`).
    #[builder(default = Duration::from_secs(60))]
    pub check_pool_period: Duration,

    /// Reaper poll/abort granularity (`TimeUnit`).
    #[builder(default = Duration::from_millis(500))]
    pub time_unit: Duration,

    /// Enables `SO_KEEPALIVE` on remote transports (`TcpKeepAlive`).
    #[builder(default = false)]
    pub tcp_keep_alive: bool,

    /// Forces an address family for remote transports (`Family`).
    #[builder(default)]
    pub family: Family,

    /// Whether `ConnectionRanOut`/`ConnectionClosed` are logged
    /// (`LogConnectionException`). When `false`, they are still propagated,
    /// just not logged.
    #[builder(default = true)]
    pub log_connection_exception: bool,

    /// TCP connect timeout. Not part of `spec.md`'s table but needed to
    /// bound `RemoteTransport::connect`'s blocking call.
    #[builder(default, setter(strip_option))]
    pub connect_timeout: Option<Duration>,

    /// Observer for pool lifecycle events (`spec.md` §7 ambient layer).
    #[builder(default, setter(strip_option))]
    pub event_handler: Option<Arc<dyn PoolEventHandler>>,
}

impl std::fmt::Debug for DataSourceOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceOptions")
            .field("connection_threshold", &self.connection_threshold)
            .field("max_pool_count", &self.max_pool_count)
            .field("check_pool_period", &self.check_pool_period)
            .field("time_unit", &self.time_unit)
            .field("tcp_keep_alive", &self.tcp_keep_alive)
            .field("family", &self.family)
            .field("log_connection_exception", &self.log_connection_exception)
            .field("connect_timeout", &self.connect_timeout)
            .field("event_handler", &self.event_handler.as_ref().map(|_| ".."))
            .finish()
    }
}

impl DataSourceOptions {
    /// The reaper period clamped to whole multiples of `time_unit`, per
    /// `spec.md` §4.3 ("minimum granularity 500ms").
    pub(crate) fn reaper_ticks(&self) -> u32 {
        let unit = self.time_unit.as_millis().max(1);
        let period = self.check_pool_period.as_millis().max(unit);
        (period / unit) as u32
    }
}
