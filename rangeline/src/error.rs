use std::io;

use thiserror::Error;

/// Errors returned by [`Client`](crate::Client) operations.
///
/// Every variant has a stable negative code (see [`Error::code`]) for
/// embedders that pass results across a numeric boundary. `-7` is reserved
/// for the internal "seek target not buffered" outcome, which is never
/// returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// A parameter was empty, out of range, or unparseable.
    #[error("invalid parameter")]
    InvalidParam,
    /// The operation is not valid in the client's current lifecycle phase.
    #[error("invalid state")]
    InvalidState,
    /// A required collaborator (worker mailbox, transport session) is missing.
    #[error("required component missing")]
    NullPointer,
    /// The deadline elapsed. The operation itself may still complete.
    #[error("timed out")]
    Timeout,
    /// The read position is at or past the end of the resource.
    #[error("end of resource")]
    Eof,
    /// The resource size is not known yet.
    #[error("not supported")]
    NotSupported,
    #[error("host resolution failed")]
    ResolveFail,
    #[error("connect failed")]
    ConnectFail,
    /// Transport setup failed in a way that retrying will not fix.
    #[error("fatal error")]
    FatalError,
}

impl Error {
    pub fn code(self) -> i32 {
        match self {
            Error::InvalidParam => -1,
            Error::InvalidState => -2,
            Error::NullPointer => -3,
            Error::Timeout => -4,
            Error::Eof => -5,
            Error::NotSupported => -6,
            Error::ResolveFail => -8,
            Error::ConnectFail => -9,
            Error::FatalError => -10,
        }
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        let kind = match e {
            Error::InvalidParam => io::ErrorKind::InvalidInput,
            Error::Timeout => io::ErrorKind::TimedOut,
            Error::Eof => io::ErrorKind::UnexpectedEof,
            Error::NotSupported => io::ErrorKind::Unsupported,
            Error::ConnectFail => io::ErrorKind::ConnectionRefused,
            Error::ResolveFail => io::ErrorKind::NotFound,
            Error::InvalidState | Error::NullPointer | Error::FatalError => io::ErrorKind::Other,
        };
        io::Error::new(kind, e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failures reported by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Error)]
pub enum TransportError {
    /// Building the session (TLS, socket, endpoint) failed.
    #[error("initialize: {0}")]
    Init(String),
    /// The handshake failed or timed out.
    #[error("connect: {0}")]
    Connect(String),
    /// A request could not be written.
    #[error("send: {0}")]
    Send(String),
    /// `initialize` has not run, or the session was torn down.
    #[error("no transport session")]
    NoSession,
    #[error("not connected")]
    NotConnected,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Init(_) | TransportError::Io(_) => Error::FatalError,
            TransportError::Connect(_) | TransportError::Send(_) | TransportError::NotConnected => {
                Error::ConnectFail
            }
            TransportError::NoSession => Error::NullPointer,
        }
    }
}
