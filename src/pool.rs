//! `PortPool` (`spec.md` §4.3): the set of idle `Port`s a `DataSource` keeps
//! around for reuse, plus the set of `SlaveID`s the server has told the
//! client to stop reusing.
//!
//! Grounded on `cmap::ConnectionPool`'s `available_connections` deque, with
//! a pool entry here being a whole `Port` (a live connection plus its
//! server-assigned `SlaveID`) rather than a driver-internal `Connection`.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use crate::port::Port;

struct State {
    idle: VecDeque<Port>,
    expunged: HashSet<i32>,
    pending_report: Vec<i32>,
}

/// Thread-safe pool of idle, reusable `Port`s.
///
/// All mutation goes through a single mutex, mirroring
/// `cmap::ConnectionPoolInner`'s `available_connections` guard — pools in
/// this crate are small (bounded by `max_pool_count`), so a single lock is
/// simpler than the driver's full wait-queue machinery and does not show up
/// as a bottleneck.
pub(crate) struct PortPool {
    state: Mutex<State>,
}

impl PortPool {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State {
                idle: VecDeque::new(),
                expunged: HashSet::new(),
                pending_report: Vec::new(),
            }),
        }
    }

    /// Returns an idle `Port` if one is available, preferring the
    /// least-recently-pushed one (FIFO) so idle connections rotate rather
    /// than a single one taking all the traffic.
    pub(crate) fn pop(&self) -> Option<Port> {
        self.state.lock().unwrap().idle.pop_front()
    }

    /// Returns `port` to the pool, unless its `SlaveID` has been expunged or
    /// the pool is already at capacity — in either case the `Port` is
    /// handed back to the caller (along with whether it was the expunged
    /// `SlaveID` check that rejected it, for event reporting) so it can be
    /// closed instead.
    pub(crate) fn push(&self, mut port: Port, max_pool_count: u32) -> Option<(Port, bool)> {
        let mut state = self.state.lock().unwrap();
        let expunged = state.expunged.contains(&port.slave_id());

        if expunged || state.idle.len() as u32 >= max_pool_count {
            return Some((port, expunged));
        }

        port.reset();
        state.idle.push_back(port);
        None
    }

    /// Removes every idle `Port` beyond what `max_pool_count` allows once
    /// already-expunged `SlaveID`s are taken into account, oldest first, and
    /// queues their ids for the next reaper report (`spec.md` §4.3 step 1-2).
    ///
    /// Per DESIGN NOTES, the distilled formula ("oldest `|pool| −
    /// MaxPoolCount − |expunged|`") is read as: the expunged set already
    /// counts against the pool's budget, so the allowed idle count is
    /// `MaxPoolCount − |expunged|` and anything beyond that is surplus.
    pub(crate) fn drain_surplus(&self, max_pool_count: u32) -> Vec<Port> {
        let mut state = self.state.lock().unwrap();
        let keep = max_pool_count.saturating_sub(state.expunged.len() as u32);

        let mut surplus = Vec::new();
        while state.idle.len() as u32 > keep {
            match state.idle.pop_front() {
                Some(port) => {
                    let slave_id = port.slave_id();
                    state.pending_report.push(slave_id);
                    state.expunged.insert(slave_id);
                    surplus.push(port);
                }
                None => break,
            }
        }
        surplus
    }

    /// Drains and returns every `SlaveID` queued for the next
    /// `NoReuseConnection` report.
    pub(crate) fn take_pending_report(&self) -> Vec<i32> {
        std::mem::take(&mut self.state.lock().unwrap().pending_report)
    }

    #[cfg(test)]
    pub(crate) fn idle_count(&self) -> usize {
        self.state.lock().unwrap().idle.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::protocol::MasterId;
    use crate::transport::{AnyTransport, LocalTransport};

    /// A `Port` whose handshake is answered inline by a throwaway thread, so
    /// pool tests can deal in real `Port` values without a `DataSource`.
    fn test_port(id: u32, slave_id: i32) -> Port {
        let (client, server) = LocalTransport::pair();
        let responder = std::thread::spawn(move || {
            let mut channel = crate::protocol::FramedChannel::new(server);
            let master_word = channel.read_integer().unwrap();
            let _requested_slave = channel.read_integer().unwrap();
            channel.write_integer(master_word).unwrap();
            channel.write_integer(slave_id).unwrap();
        });
        let port = Port::handshake(id, AnyTransport::Local(client), MasterId::new(5), slave_id).unwrap();
        responder.join().unwrap();
        port
    }

    #[test]
    fn pop_returns_ports_in_fifo_order() {
        let pool = PortPool::new();
        assert!(pool.push(test_port(1, 10), 10).is_none());
        assert!(pool.push(test_port(2, 11), 10).is_none());
        assert_eq!(pool.idle_count(), 2);

        let first = pool.pop().unwrap();
        assert_eq!(first.slave_id(), 10);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn push_rejects_once_the_pool_is_at_capacity() {
        let pool = PortPool::new();
        assert!(pool.push(test_port(1, 1), 1).is_none());
        assert!(pool.push(test_port(2, 2), 1).is_some());
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn drain_surplus_expunges_the_slave_ids_it_evicts() {
        let pool = PortPool::new();
        pool.push(test_port(1, 1), 10);
        pool.push(test_port(2, 2), 10);
        pool.push(test_port(3, 3), 10);

        let surplus = pool.drain_surplus(1);
        assert_eq!(surplus.len(), 2);
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.take_pending_report().len(), 2);

        let remaining = pool.pop().unwrap();
        assert_eq!(remaining.slave_id(), 3);

        // slave_id 1 was expunged by the drain above, so a port that still
        // carries it is rejected even though the pool has room again.
        assert!(pool.push(test_port(4, 1), 10).is_some());
    }
}
