/// Errors produced by the HTTP/3 client layer.
#[derive(Debug, thiserror::Error)]
pub enum H3Error {
    /// QUIC transport error.
    #[error("quic: {0}")]
    Quic(#[from] rangeline_quic::Error),
    /// A frame type that is not allowed on this stream (or is reserved
    /// from HTTP/2).
    #[error("unexpected frame type")]
    FrameUnexpected,
    /// Frame decoding error (truncated varint, invalid payload, etc.).
    #[error("frame error")]
    FrameError,
    /// QPACK field section decoding failed.
    #[error("QPACK decoding failed")]
    QpackDecodingFailed,
    /// The peer closed its control stream.
    #[error("critical stream closed")]
    ClosedCriticalStream,
    /// The peer's stream limit leaves no room for another request.
    #[error("stream limit reached")]
    StreamBlocked,
    /// Internal error with a description.
    #[error("internal: {0}")]
    Internal(String),
}

impl H3Error {
    /// Application error code to close the connection (or abort a stream)
    /// with when this error is fatal.
    pub fn code(&self) -> u64 {
        match self {
            H3Error::FrameUnexpected => codes::H3_FRAME_UNEXPECTED,
            H3Error::FrameError => codes::H3_FRAME_ERROR,
            H3Error::QpackDecodingFailed => codes::QPACK_DECOMPRESSION_FAILED,
            H3Error::ClosedCriticalStream => codes::H3_CLOSED_CRITICAL_STREAM,
            H3Error::Quic(_) | H3Error::StreamBlocked | H3Error::Internal(_) => {
                codes::H3_INTERNAL_ERROR
            }
        }
    }
}

/// HTTP/3 application error codes (RFC 9114 Section 8.1) used by this client.
pub mod codes {
    pub const H3_NO_ERROR: u64 = 0x100;
    pub const H3_GENERAL_PROTOCOL_ERROR: u64 = 0x101;
    pub const H3_INTERNAL_ERROR: u64 = 0x102;
    pub const H3_STREAM_CREATION_ERROR: u64 = 0x103;
    pub const H3_CLOSED_CRITICAL_STREAM: u64 = 0x104;
    pub const H3_FRAME_UNEXPECTED: u64 = 0x105;
    pub const H3_FRAME_ERROR: u64 = 0x106;
    pub const H3_ID_ERROR: u64 = 0x108;
    pub const H3_REQUEST_REJECTED: u64 = 0x10b;
    pub const H3_REQUEST_CANCELLED: u64 = 0x10c;
    pub const H3_MESSAGE_ERROR: u64 = 0x10e;
    pub const QPACK_DECOMPRESSION_FAILED: u64 = 0x200;
}
