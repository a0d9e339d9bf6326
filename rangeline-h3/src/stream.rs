//! Per-stream state for client request streams.

use rangeline_quic::StreamId;

/// Progress of the response on a request stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamState {
    /// Request sent (or partly sent); no final response HEADERS yet.
    AwaitingResponse,
    /// Final response headers seen; DATA frames may follow.
    Receiving,
    /// An event carrying `end_stream` has been emitted.
    Finished,
}

/// A request stream opened by [`H3Client`](crate::H3Client).
pub(crate) struct RequestStream {
    pub id: StreamId,
    pub state: StreamState,
    /// Frame bytes received but not yet parsed.
    pub recv_buf: Vec<u8>,
    /// Bytes left in the DATA frame currently being delivered. DATA
    /// payloads are handed out as they arrive rather than buffered whole.
    pub data_remaining: u64,
    /// Encoded request bytes that flow control has not accepted yet.
    pub send_buf: Vec<u8>,
    /// Send FIN once `send_buf` drains.
    pub finish_pending: bool,
}

impl RequestStream {
    pub fn new(id: StreamId, request: Vec<u8>, end_stream: bool) -> Self {
        Self {
            id,
            state: StreamState::AwaitingResponse,
            recv_buf: Vec::new(),
            data_remaining: 0,
            send_buf: request,
            finish_pending: end_stream,
        }
    }
}
