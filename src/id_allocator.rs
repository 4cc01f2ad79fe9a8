//! A global, monotonically increasing id allocator (`spec.md` §5), used for
//! the client-local ids attached to `Port`s and control connections for
//! logging/event purposes (the wire-level `SlaveID` itself is always
//! server-assigned, per `spec.md` §3's Port row).
//!
//! Modeled on `cmap::ConnectionPoolInner::next_connection_id`, generalized
//! to a reusable allocator since this crate needs one per `DataSource` for
//! ports and one per-process for control connections.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{ErrorKind, Result};

pub(crate) struct IdAllocator {
    next: AtomicU32,
}

impl IdAllocator {
    pub(crate) fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    /// Returns the next id, or `Err` if the counter has wrapped — per
    /// `spec.md` §5 this is fatal to the enclosing request rather than
    /// silently wrapping into a reused id.
    pub(crate) fn next(&self) -> Result<u32> {
        let id = self.next.fetch_add(1, Ordering::SeqCst);
        if id == u32::MAX {
            return Err(ErrorKind::Unexpected {
                message: "id allocator overflowed".to_string(),
            }
            .into());
        }
        Ok(id)
    }
}
