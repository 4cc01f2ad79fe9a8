//! `PrepareStatement` (`spec.md` §3, §4.6, §9): a server-owned prepared
//! plan, either DataSource-wide or scoped to one `Session`.
//!
//! The erase-path arithmetic follows the Open Question resolution recorded
//! in `SPEC_FULL.md` §9: a `PrepareID` returned by the DataSource-wide
//! `PrepareStatement` request is always odd; erasing it goes through the
//! scope-free `ErasePrepareStatement` request after transforming the id
//! with `(id - 1) / 2`. An even id on that path means the id actually names
//! a session-scoped statement and is rejected.

use std::sync::Arc;

use crate::datasource::DataSourceInner;
use crate::error::{ErrorKind, Result};
use crate::port::Port;
use crate::protocol::{RequestCode, Value};
use crate::protocol_util::{read_status, read_value};

/// Which handle created a `PrepareStatement`, and therefore how it must be
/// erased (`spec.md` §3's Ownership note: "Session exclusively owns
/// prepare-statements created through it").
pub(crate) enum PrepareScope {
    DataSource { database_name: String },
    Session { session_id: i32 },
}

/// A prepared statement plan (`spec.md` §3).
pub struct PrepareStatement {
    inner: Arc<DataSourceInner>,
    scope: PrepareScope,
    prepare_id: i32,
}

impl PrepareStatement {
    pub(crate) fn new(inner: Arc<DataSourceInner>, scope: PrepareScope, prepare_id: i32) -> Self {
        Self {
            inner,
            scope,
            prepare_id,
        }
    }

    pub(crate) fn prepare_id(&self) -> i32 {
        self.prepare_id
    }

    /// `true` iff this statement is still live on the server.
    pub fn is_valid(&self) -> bool {
        self.prepare_id != 0
    }

    /// Erases the statement on the server. Best-effort: failures are
    /// logged, not propagated (`spec.md` §3: "dropping on the floor is
    /// tolerated").
    pub fn close(&mut self) {
        if self.prepare_id == 0 {
            return;
        }
        let prepare_id = std::mem::replace(&mut self.prepare_id, 0);

        let result = match &self.scope {
            PrepareScope::Session { session_id } => {
                erase_session_scope(&self.inner, *session_id, prepare_id)
            }
            PrepareScope::DataSource { database_name } => {
                erase_data_source_scope(&self.inner, database_name, prepare_id)
            }
        };

        if let Err(e) = result {
            log::warn!("best-effort PrepareStatement erase failed: {e}");
        }
    }
}

impl Drop for PrepareStatement {
    fn drop(&mut self) {
        self.close();
    }
}

fn erase_session_scope(inner: &DataSourceInner, session_id: i32, prepare_id: i32) -> Result<()> {
    inner.erase_prepare_statement2(session_id, prepare_id);
    Ok(())
}

fn erase_data_source_scope(inner: &DataSourceInner, database_name: &str, prepare_id: i32) -> Result<()> {
    if prepare_id % 2 == 0 {
        return Err(ErrorKind::InvalidStatementIdentifier {
            message: format!("PrepareID {prepare_id} names a session-scoped statement"),
        }
        .into());
    }
    let transformed = (prepare_id - 1) / 2;
    inner.erase_prepare_statement(database_name, transformed);
    Ok(())
}

/// Issues DataSource-wide `PrepareStatement(databaseName, sql)` on an
/// already-checked-out worker `Port` (`spec.md` §4.6, used as the v1
/// fallback per §8 S6).
pub(crate) fn create_data_source_scope(port: &mut Port, database_name: &str, sql: &str) -> Result<i32> {
    port.write_object(&Value::Integer(RequestCode::PrepareStatement as i32))?;
    port.write_object(&Value::String(database_name.to_string()))?;
    port.write_object(&Value::String(sql.to_string()))?;
    port.flush()?;

    let prepare_id = read_value(port)?.into_integer()?;
    read_status(port)?;
    Ok(prepare_id)
}

/// Issues session-scoped `PrepareStatement2(sessionID, sql)` (`spec.md`
/// §4.6, used when the negotiated Master-ID is v3 or later).
pub(crate) fn create_session_scope(port: &mut Port, session_id: i32, sql: &str) -> Result<i32> {
    port.write_object(&Value::Integer(RequestCode::PrepareStatement2 as i32))?;
    port.write_object(&Value::Integer(session_id))?;
    port.write_object(&Value::String(sql.to_string()))?;
    port.flush()?;

    let prepare_id = read_value(port)?.into_integer()?;
    read_status(port)?;
    Ok(prepare_id)
}
