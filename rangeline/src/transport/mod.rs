//! The transport capability surface the client drives.
//!
//! A [`Transport`] owns one connection to the origin and multiplexes
//! request sub-streams over it. It never calls back into the client except
//! through the [`StreamDelegate`] passed to `send_request` and `drive`, and
//! only from the client's worker thread.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rangeline_h3::codes;

use crate::error::TransportError;
use crate::session::HeaderBlock;
use crate::tls::Verification;

mod h3;

pub use h3::H3Transport;

/// Identifier of a request sub-stream, unique within one transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u64);

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why the client abandons a sub-stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    /// Superseded by a newer sub-stream.
    Refused,
    /// The reader moved elsewhere or switched resource.
    Cancelled,
    /// The body overran its announced length.
    BadPayload,
}

impl ResetReason {
    /// HTTP/3 application error code carried by the reset.
    pub fn code(self) -> u64 {
        match self {
            ResetReason::Refused => codes::H3_REQUEST_REJECTED,
            ResetReason::Cancelled => codes::H3_REQUEST_CANCELLED,
            ResetReason::BadPayload => codes::H3_MESSAGE_ERROR,
        }
    }
}

/// Sub-stream lifecycle callbacks, delivered on the worker thread.
pub trait StreamDelegate {
    /// `send_request` opened `stream`. Called before it returns.
    fn on_stream_created(&mut self, stream: StreamId);
    /// Final response head for `stream`. Pseudo-fields are not included.
    fn on_response(&mut self, stream: StreamId, status: u16, headers: &HeaderBlock);
    /// A chunk of response body, in order.
    fn on_data(&mut self, stream: StreamId, data: &[u8]);
    /// `stream` is finished: complete, reset by the peer or lost with the
    /// connection. Not called for streams the client reset itself.
    fn on_stream_closed(&mut self, stream: StreamId);
}

/// Path statistics of the live connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub packets_lost: u64,
    pub packets_reordered: u64,
    pub rtt: Duration,
    /// Estimated bandwidth in bits per second.
    pub bandwidth: u64,
}

/// Everything a transport needs to reach the origin.
#[derive(Debug, Clone)]
pub struct TransportParams {
    pub peer: SocketAddr,
    /// TLS server name; the url's host.
    pub server_name: String,
    /// QUIC version to pin, `None` for the engine's default.
    pub version: Option<u32>,
    pub verification: Verification,
    pub connect_timeout: Duration,
    pub idle_timeout: Option<Duration>,
}

/// Connection to one origin.
///
/// `initialize` builds the session objects; `connect` performs the
/// handshake. A lost connection can be brought back with another
/// `initialize` + `connect` pair on the same value.
pub trait Transport: Send {
    fn initialize(&mut self) -> Result<(), TransportError>;
    fn connect(&mut self) -> Result<(), TransportError>;
    fn is_connected(&self) -> bool;
    /// Close the connection and drop the session. Idempotent.
    fn disconnect(&mut self);
    /// Open a sub-stream carrying `headers` and `body`; `fin` ends the
    /// request side. `delegate.on_stream_created` fires before returning.
    fn send_request(
        &mut self,
        headers: &HeaderBlock,
        body: &[u8],
        fin: bool,
        delegate: &mut dyn StreamDelegate,
    ) -> Result<StreamId, TransportError>;
    /// Abandon `stream` in both directions. Unknown streams are ignored.
    fn reset_stream(&mut self, stream: StreamId, reason: ResetReason);
    fn stats(&self) -> Result<TransportStats, TransportError>;
    /// Make progress for at most `max_wait`, delivering stream events.
    fn drive(&mut self, max_wait: Duration, delegate: &mut dyn StreamDelegate);
}

/// Builds a transport for a resolved session.
pub type TransportFactory = Arc<dyn Fn(TransportParams) -> Box<dyn Transport> + Send + Sync>;

/// Factory for the HTTP/3 transport.
pub fn h3_transport() -> TransportFactory {
    Arc::new(|params| Box::new(H3Transport::new(params)))
}
