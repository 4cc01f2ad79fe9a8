//! Contains the `Error` and `Result` types that this crate uses.

use thiserror::Error;

/// The result type for all fallible operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur anywhere in the client connection, session or
/// result-set subsystem.
///
/// The inner [`ErrorKind`] is boxed to keep `Error` small to move around and
/// cheap to wrap; `source` carries the (optional) error that caused this one,
/// mirroring the chaining `mongodb::Error` does.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct Error {
    pub kind: Box<ErrorKind>,
    #[source]
    source: Option<Box<Error>>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self {
            kind: Box::new(kind),
            source: None,
        }
    }

    pub(crate) fn with_source(kind: ErrorKind, source: Error) -> Self {
        Self {
            kind: Box::new(kind),
            source: Some(Box::new(source)),
        }
    }

    /// Returns `true` if this error indicates the underlying transport died;
    /// `DataSource::create_session` uses this to decide whether a reopen is
    /// warranted (see `spec.md` §4.5 / §7).
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            *self.kind,
            ErrorKind::ConnectionClosed { .. } | ErrorKind::ConnectionRanOut { .. }
        )
    }

    /// Returns `true` if a server-side error was tagged `ErrorLevel::User`,
    /// meaning the `Port` that raised it remains reusable.
    pub fn is_user_level(&self) -> bool {
        matches!(&*self.kind, ErrorKind::Server { reusable, .. } if *reusable)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::UnexpectedEof => Error::new(ErrorKind::ConnectionClosed {
                message: e.to_string(),
            }),
            _ => Error::new(ErrorKind::ConnectionRanOut {
                message: e.to_string(),
            }),
        }
    }
}

/// The taxonomy of errors surfaced at the API boundary (`spec.md` §6) plus
/// the internal variants needed to classify a failure before it reaches
/// that boundary (`spec.md` §7).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// An argument passed to an API call was invalid.
    #[error("bad argument: {message}")]
    BadArgument { message: String },

    /// A frame carried an object of an unexpected class.
    #[error("class cast failure: expected {expected}, got class id {actual}")]
    ClassCast { expected: &'static str, actual: u32 },

    /// The peer closed the connection (EOF during read).
    #[error("connection closed: {message}")]
    ConnectionClosed { message: String },

    /// An I/O error other than a clean close occurred on the transport.
    #[error("connection ran out: {message}")]
    ConnectionRanOut { message: String },

    /// An operation was attempted on a `DataSource` that has not been
    /// opened, or whose control-connection array is empty.
    #[error("data source is not initialized")]
    NotInitialized,

    /// A feature or code path is not supported by this implementation.
    #[error("not supported: {message}")]
    NotSupported { message: String },

    /// A numeric value fell outside the range the protocol allows.
    #[error("numeric value out of range: {message}")]
    NumericValueOutOfRange { message: String },

    /// A `PrepareId`/`WorkerID`/`SlaveID` referenced an object the server
    /// does not recognise, or failed a parity/shape check.
    #[error("invalid statement identifier: {message}")]
    InvalidStatementIdentifier { message: String },

    /// An operation was attempted on a `Session` whose id is `0` (closed or
    /// never opened).
    #[error("session not available")]
    SessionNotAvailable,

    /// `CheckAvailability` reported the server is not available.
    #[error("server not available")]
    ServerNotAvailable,

    /// An array argument was truncated because it did not fit the protocol.
    #[error("array right truncation: {message}")]
    ArrayRightTruncation { message: String },

    /// A string argument was truncated because it did not fit the protocol.
    #[error("string right truncation: {message}")]
    StringRightTruncation { message: String },

    /// The server's reply did not parse as a valid frame.
    #[error("invalid response: {message}")]
    InvalidResponse { message: String },

    /// The handshake on a new `Port` did not complete.
    #[error("handshake failed: {message}")]
    HandshakeFailed { message: String },

    /// A server-side exception (`ExceptionObject`), optionally preceded by
    /// an `ErrorLevel` that determines whether the originating `Port`
    /// remains reusable.
    #[error("server error {error_number}: {message}")]
    Server {
        error_number: i32,
        message: String,
        arguments: Vec<String>,
        reusable: bool,
    },

    /// Something that should never happen happened; indicates a bug in
    /// this crate or an incompatible server.
    #[error("unexpected: {message}")]
    Unexpected { message: String },
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}
