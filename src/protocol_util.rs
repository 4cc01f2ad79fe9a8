//! Small helpers shared by every module that drives the `Request ->
//! flush -> Status` exchange (`spec.md` §4.7: "every frame sequence ends
//! with exactly one Status").

use crate::error::{ErrorKind, Result};
use crate::port::Port;
use crate::protocol::{StatusCode, Value};

pub(crate) fn read_value(port: &mut Port) -> Result<Value> {
    port.read_object()?.ok_or_else(|| {
        ErrorKind::InvalidResponse {
            message: "expected a value frame, got end-of-data".to_string(),
        }
        .into()
    })
}

pub(crate) fn read_status(port: &mut Port) -> Result<()> {
    match read_value(port)?.into_status()? {
        StatusCode::Success => Ok(()),
        other => Err(ErrorKind::InvalidResponse {
            message: format!("meta-request returned unexpected status {other:?}"),
        }
        .into()),
    }
}
