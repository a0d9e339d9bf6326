use std::io;

use quinn_proto::{ConnectError, ConnectionError, ReadError, ReadableError, WriteError};

/// Errors returned by rangeline-quic operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("connection closed")]
    ConnectionClosed,

    #[error("invalid connection")]
    InvalidConnection,

    #[error("stream already closed")]
    ClosedStream,

    #[error("stream reset by peer (code {0})")]
    Reset(u64),

    #[error("connect: {0}")]
    Connect(#[from] ConnectError),

    #[error("connection: {0}")]
    Connection(#[from] ConnectionError),

    #[error("write: {0}")]
    Write(#[from] WriteError),

    #[error("read: {0}")]
    Read(ReadError),

    #[error("readable: {0}")]
    Readable(#[from] ReadableError),

    #[error("io: {0}")]
    Io(#[from] io::Error),
}

impl From<ReadError> for Error {
    fn from(e: ReadError) -> Self {
        match e {
            ReadError::Reset(code) => Self::Reset(code.into_inner()),
            other => Self::Read(other),
        }
    }
}
