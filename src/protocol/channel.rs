//! Layers `writeObject`/`readObject` framing, plus the raw handshake
//! integer helpers, on top of a [`crate::transport::Transport`]
//! (`spec.md` §4.2).

use std::time::Duration;

use crate::error::{Error, ErrorKind, Result};
use crate::transport::Transport;

use super::value::{
    self, read_error_level, read_exception_payload, read_u32, ErrorLevel, Value,
    CLASS_ERROR_LEVEL, CLASS_EXCEPTION_OBJECT,
};

const CLASS_NULL: u32 = 0;

/// The framed object channel. Generic over the transport so the identical
/// codec runs whether the underlying pipe is a TCP socket or an in-process
/// ring buffer.
pub(crate) struct FramedChannel<T: Transport> {
    transport: T,
}

impl<T: Transport> FramedChannel<T> {
    pub(crate) fn new(transport: T) -> Self {
        Self { transport }
    }

    pub(crate) fn wait(&mut self, timeout: Option<Duration>) -> Result<bool> {
        self.transport.wait(timeout)
    }

    pub(crate) fn close(&mut self) {
        self.transport.close();
    }

    pub(crate) fn flush(&mut self) -> Result<()> {
        self.transport.flush_transport()
    }

    /// Raw 32-bit integer write, used only during the first few handshake
    /// bytes of a new `Port` (`spec.md` §4.2).
    pub(crate) fn write_integer(&mut self, value: i32) -> Result<()> {
        use std::io::Write;
        self.transport.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    /// Raw 32-bit integer read, used only during the handshake.
    pub(crate) fn read_integer(&mut self) -> Result<i32> {
        value::read_i32(&mut self.transport)
    }

    /// Writes a self-describing, length-delimited frame tagged with `value`'s
    /// class identifier.
    pub(crate) fn write_object(&mut self, value: &Value) -> Result<()> {
        use std::io::Write;
        let mut buf = Vec::new();
        value::write_framed(&mut buf, value);
        self.transport.write_all(&buf)?;
        Ok(())
    }

    /// Reads one frame and dispatches on its class id (`spec.md` §4.2):
    ///
    /// * `ExceptionObject` → returns `Err`, server-side exception rethrown
    ///   to the caller (conservatively treated as not reusable, since no
    ///   preceding `ErrorLevel` was observed to say otherwise).
    /// * `ErrorLevel` → reads the following frame (guaranteed
    ///   `ExceptionObject`), and returns `Err` whose `reusable` flag is
    ///   derived from `User`/`System`.
    /// * a null frame (`class_id == 0`) → `Ok(None)`, meaning end-of-data.
    /// * anything else → `Ok(Some(value))`.
    pub(crate) fn read_object(&mut self) -> Result<Option<Value>> {
        let class_id = read_u32(&mut self.transport)?;
        let len = read_u32(&mut self.transport)? as usize;

        match class_id {
            CLASS_NULL => {
                debug_assert_eq!(len, 0, "null frame must carry no payload");
                Ok(None)
            }
            CLASS_ERROR_LEVEL => {
                let mut payload = vec![0u8; len];
                std::io::Read::read_exact(&mut self.transport, &mut payload)?;
                let level = read_error_level(&mut payload.as_slice())?;
                self.expect_exception(level)
            }
            CLASS_EXCEPTION_OBJECT => {
                let mut payload = vec![0u8; len];
                std::io::Read::read_exact(&mut self.transport, &mut payload)?;
                Err(self.exception_error(&mut payload.as_slice(), ErrorLevel::System)?)
            }
            other => {
                let mut payload = vec![0u8; len];
                std::io::Read::read_exact(&mut self.transport, &mut payload)?;
                Ok(Some(value::decode_payload(other, &mut payload.as_slice())?))
            }
        }
    }

    fn expect_exception(&mut self, level: ErrorLevel) -> Result<Option<Value>> {
        let class_id = read_u32(&mut self.transport)?;
        let len = read_u32(&mut self.transport)? as usize;

        if class_id != CLASS_EXCEPTION_OBJECT {
            return Err(ErrorKind::InvalidResponse {
                message: format!(
                    "ErrorLevel must be followed by ExceptionObject, got class id {class_id}"
                ),
            }
            .into());
        }

        let mut payload = vec![0u8; len];
        std::io::Read::read_exact(&mut self.transport, &mut payload)?;
        Err(self.exception_error(&mut payload.as_slice(), level)?)
    }

    fn exception_error(
        &self,
        payload: &mut impl std::io::Read,
        level: ErrorLevel,
    ) -> Result<Error> {
        let exception = read_exception_payload(payload)?;
        Ok(ErrorKind::Server {
            error_number: exception.error_number,
            message: exception.message,
            arguments: exception.arguments,
            reusable: matches!(level, ErrorLevel::User),
        }
        .into())
    }
}
