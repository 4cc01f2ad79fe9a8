//! The distinguished class identifiers the core must recognise
//! (`spec.md` §4.2) and the closed set of self-describing values built on
//! top of them.
//!
//! Per DESIGN NOTES §9, `Common::Externalizable`/`ExecutableObject` (a
//! reference-counted, factory-constructed hierarchy in the original
//! implementation) is re-expressed here as a plain sum type: each frame has
//! exactly one consumer, so there is no need for shared ownership or a
//! runtime class registry — `class_id()`/`write_payload()`/`read_payload()`
//! on [`Value`] play the role of `ClassId()`/`Serialize()`/`Deserialize()`.

use std::io::{self, Read};

use crate::error::{Error, ErrorKind, Result};

pub(crate) const CLASS_INTEGER_DATA: u32 = 1;
pub(crate) const CLASS_UNSIGNED_INTEGER_DATA: u32 = 2;
pub(crate) const CLASS_STRING_DATA: u32 = 3;
pub(crate) const CLASS_DATA_ARRAY_DATA: u32 = 4;
pub(crate) const CLASS_RESULT_SET_META_DATA: u32 = 5;
pub(crate) const CLASS_STATUS: u32 = 6;
pub(crate) const CLASS_EXCEPTION_OBJECT: u32 = 7;
pub(crate) const CLASS_ERROR_LEVEL: u32 = 8;
pub(crate) const CLASS_INTEGER_ARRAY_DATA: u32 = 9;

/// One column's metadata in a [`Value::ResultSetMetaData`].
///
/// The value type system itself (how `type_class_id` maps to a concrete
/// `DataType`) is out of scope (`spec.md` §1); the core only needs to carry
/// it through to the caller untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetaData {
    pub name: String,
    pub type_class_id: u32,
}

/// Terminal marker for a meta-request or a streamed result set
/// (`spec.md` §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Success,
    Canceled,
    HasMoreData,
}

/// Precedes an `ExceptionObject`; tells the client whether the `Port` that
/// raised it remains reusable (`spec.md` §4.2, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorLevel {
    User,
    System,
}

/// The closed set of object classes this crate needs to frame.
///
/// `ExceptionObject` and `ErrorLevel` are deliberately not variants here:
/// per `spec.md` §4.2 they are never handed to a caller as data, they are
/// recognised by [`super::FramedChannel::read_object`] and turned directly
/// into an `Err(Error)`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i32),
    UnsignedInteger(u32),
    String(String),
    IntegerArray(Vec<i32>),
    DataArray(Vec<Value>),
    ResultSetMetaData(Vec<ColumnMetaData>),
    Status(StatusCode),
}

impl Value {
    pub(crate) fn class_id(&self) -> u32 {
        match self {
            Value::Integer(_) => CLASS_INTEGER_DATA,
            Value::UnsignedInteger(_) => CLASS_UNSIGNED_INTEGER_DATA,
            Value::String(_) => CLASS_STRING_DATA,
            Value::IntegerArray(_) => CLASS_INTEGER_ARRAY_DATA,
            Value::DataArray(_) => CLASS_DATA_ARRAY_DATA,
            Value::ResultSetMetaData(_) => CLASS_RESULT_SET_META_DATA,
            Value::Status(_) => CLASS_STATUS,
        }
    }

    pub(crate) fn write_payload(&self, buf: &mut Vec<u8>) {
        match self {
            Value::Integer(i) => buf.extend_from_slice(&i.to_le_bytes()),
            Value::UnsignedInteger(u) => buf.extend_from_slice(&u.to_le_bytes()),
            Value::String(s) => write_string(buf, s),
            Value::IntegerArray(items) => {
                buf.extend_from_slice(&(items.len() as u32).to_le_bytes());
                for i in items {
                    buf.extend_from_slice(&i.to_le_bytes());
                }
            }
            Value::DataArray(items) => {
                buf.extend_from_slice(&(items.len() as u32).to_le_bytes());
                for item in items {
                    write_framed(buf, item);
                }
            }
            Value::ResultSetMetaData(columns) => {
                buf.extend_from_slice(&(columns.len() as u32).to_le_bytes());
                for column in columns {
                    write_string(buf, &column.name);
                    buf.extend_from_slice(&column.type_class_id.to_le_bytes());
                }
            }
            Value::Status(status) => buf.push(status_to_byte(*status)),
        }
    }

    /// Attempts to view this value as a `StringData`, used for handshake
    /// fields. `ErrorKind::ClassCast` mirrors `spec.md` §6's boundary error
    /// of the same name.
    pub(crate) fn into_string(self) -> Result<String> {
        match self {
            Value::String(s) => Ok(s),
            other => Err(ErrorKind::ClassCast {
                expected: "StringData",
                actual: other.class_id(),
            }
            .into()),
        }
    }

    pub(crate) fn into_integer(self) -> Result<i32> {
        match self {
            Value::Integer(i) => Ok(i),
            other => Err(ErrorKind::ClassCast {
                expected: "IntegerData",
                actual: other.class_id(),
            }
            .into()),
        }
    }

    pub(crate) fn into_status(self) -> Result<StatusCode> {
        match self {
            Value::Status(s) => Ok(s),
            other => Err(ErrorKind::ClassCast {
                expected: "Status",
                actual: other.class_id(),
            }
            .into()),
        }
    }

    pub(crate) fn into_data_array(self) -> Result<Vec<Value>> {
        match self {
            Value::DataArray(items) => Ok(items),
            other => Err(ErrorKind::ClassCast {
                expected: "DataArrayData",
                actual: other.class_id(),
            }
            .into()),
        }
    }
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

fn read_string(r: &mut impl Read) -> Result<String> {
    let len = read_u32(r)? as usize;
    let mut bytes = vec![0u8; len];
    r.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|e| {
        ErrorKind::InvalidResponse {
            message: format!("StringData was not valid UTF-8: {e}"),
        }
        .into()
    })
}

pub(crate) fn read_u32(r: &mut impl Read) -> Result<u32> {
    let mut bytes = [0u8; 4];
    r.read_exact(&mut bytes).map_err(io_to_error)?;
    Ok(u32::from_le_bytes(bytes))
}

pub(crate) fn read_i32(r: &mut impl Read) -> Result<i32> {
    Ok(read_u32(r)? as i32)
}

fn io_to_error(e: io::Error) -> Error {
    e.into()
}

fn status_to_byte(status: StatusCode) -> u8 {
    match status {
        StatusCode::Success => 0,
        StatusCode::Canceled => 1,
        StatusCode::HasMoreData => 2,
    }
}

fn status_from_byte(b: u8) -> Result<StatusCode> {
    match b {
        0 => Ok(StatusCode::Success),
        1 => Ok(StatusCode::Canceled),
        2 => Ok(StatusCode::HasMoreData),
        other => Err(ErrorKind::InvalidResponse {
            message: format!("unknown Status value {other}"),
        }
        .into()),
    }
}

fn error_level_from_byte(b: u8) -> Result<ErrorLevel> {
    match b {
        0 => Ok(ErrorLevel::User),
        1 => Ok(ErrorLevel::System),
        other => Err(ErrorKind::InvalidResponse {
            message: format!("unknown ErrorLevel value {other}"),
        }
        .into()),
    }
}

/// Writes `value` as a self-contained `[class_id][length][payload]` frame,
/// the same shape [`super::FramedChannel::write_object`] uses at the top
/// level — reused here so `DataArrayData` can nest arbitrary values.
pub(crate) fn write_framed(buf: &mut Vec<u8>, value: &Value) {
    let mut payload = Vec::new();
    value.write_payload(&mut payload);
    buf.extend_from_slice(&value.class_id().to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&payload);
}

/// Reads one `[class_id][length][payload]` frame and decodes it into a
/// [`Value`]. Does not handle `ExceptionObject`/`ErrorLevel`; callers that
/// may see those (only [`super::FramedChannel::read_object`] at the
/// top level) must check the class id themselves before delegating here.
pub(crate) fn read_framed(r: &mut impl Read) -> Result<Value> {
    let class_id = read_u32(r)?;
    let len = read_u32(r)? as usize;
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload).map_err(io_to_error)?;
    decode_payload(class_id, &mut payload.as_slice())
}

pub(crate) fn decode_payload(class_id: u32, r: &mut impl Read) -> Result<Value> {
    match class_id {
        CLASS_INTEGER_DATA => Ok(Value::Integer(read_i32(r)?)),
        CLASS_UNSIGNED_INTEGER_DATA => Ok(Value::UnsignedInteger(read_u32(r)?)),
        CLASS_STRING_DATA => Ok(Value::String(read_string(r)?)),
        CLASS_INTEGER_ARRAY_DATA => {
            let count = read_u32(r)? as usize;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(read_i32(r)?);
            }
            Ok(Value::IntegerArray(items))
        }
        CLASS_DATA_ARRAY_DATA => {
            let count = read_u32(r)? as usize;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(read_framed(r)?);
            }
            Ok(Value::DataArray(items))
        }
        CLASS_RESULT_SET_META_DATA => {
            let count = read_u32(r)? as usize;
            let mut columns = Vec::with_capacity(count);
            for _ in 0..count {
                let name = read_string(r)?;
                let type_class_id = read_u32(r)?;
                columns.push(ColumnMetaData { name, type_class_id });
            }
            Ok(Value::ResultSetMetaData(columns))
        }
        CLASS_STATUS => {
            let mut byte = [0u8; 1];
            r.read_exact(&mut byte).map_err(io_to_error)?;
            Ok(Value::Status(status_from_byte(byte[0])?))
        }
        other => Err(ErrorKind::InvalidResponse {
            message: format!("unrecognised class id {other}"),
        }
        .into()),
    }
}

/// Decoded `ExceptionObject` payload.
pub(crate) struct ExceptionPayload {
    pub(crate) error_number: i32,
    pub(crate) message: String,
    pub(crate) arguments: Vec<String>,
}

pub(crate) fn read_error_level(r: &mut impl Read) -> Result<ErrorLevel> {
    let mut byte = [0u8; 1];
    r.read_exact(&mut byte).map_err(io_to_error)?;
    error_level_from_byte(byte[0])
}

pub(crate) fn read_exception_payload(r: &mut impl Read) -> Result<ExceptionPayload> {
    let error_number = read_i32(r)?;
    let message = read_string(r)?;
    let arg_count = read_u32(r)? as usize;
    let mut arguments = Vec::with_capacity(arg_count);
    for _ in 0..arg_count {
        arguments.push(read_string(r)?);
    }
    Ok(ExceptionPayload {
        error_number,
        message,
        arguments,
    })
}
