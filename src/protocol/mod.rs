//! The framed object channel (`spec.md` §4.2) layered on top of a
//! [`crate::transport::Transport`], and the closed set of frame classes the
//! core needs to recognise.

mod channel;
mod master_id;
mod request;
mod value;

pub(crate) use channel::FramedChannel;
pub(crate) use master_id::{AuthorizationMode, MasterId};
pub(crate) use request::{RequestCode, Target, SLAVE_ID_ANY};
pub(crate) use value::{ErrorLevel, StatusCode};

// Re-exported at the crate root (`lib.rs`) as part of the public API: these
// two appear directly in `Session`/`ResultSet` method signatures.
pub use value::{ColumnMetaData, Value};
