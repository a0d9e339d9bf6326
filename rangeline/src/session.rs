//! Per-session parameters: what to fetch, from where, and how.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::time::Instant;

use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

/// Smallest block size honoured for the first window; anything smaller
/// falls back to [`DEFAULT_REQUEST_BLOCK`].
pub const MIN_REQUEST_BLOCK: u64 = 32 * 1024;
pub const DEFAULT_REQUEST_BLOCK: u64 = 1024 * 1024;

const TLS13: u32 = 0x0304;

// ── Header block ────────────────────────────────────────────────────

/// Ordered request or response fields. Names compare case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderBlock(Vec<(String, String)>);

impl HeaderBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// Replace every field called `name` with a single one.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.remove(name);
        self.0.push((name.to_owned(), value.into()));
    }

    pub fn remove(&mut self, name: &str) {
        self.0.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).next()
    }

    pub fn get_all<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> {
        self.0
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for HeaderBlock {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        )
    }
}

// ── Range windows ───────────────────────────────────────────────────

/// Size of the first range request of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Window {
    /// [`DEFAULT_REQUEST_BLOCK`] bytes.
    #[default]
    Default,
    /// No `range` field at all: the whole resource in one response.
    Whole,
    /// This many bytes; values below [`MIN_REQUEST_BLOCK`] use the default.
    Bytes(u64),
}

impl Window {
    /// Map the integer convention: negative is the default window, zero is
    /// the whole resource.
    pub fn from_block_size(block_size: i64) -> Self {
        match block_size {
            n if n < 0 => Window::Default,
            0 => Window::Whole,
            n => Window::Bytes(n.unsigned_abs()),
        }
    }

    /// Block size handed to the prefetcher; zero for [`Window::Whole`].
    pub fn block_size(self) -> u64 {
        match self {
            Window::Whole => 0,
            Window::Bytes(n) if n >= MIN_REQUEST_BLOCK => n,
            Window::Bytes(_) | Window::Default => DEFAULT_REQUEST_BLOCK,
        }
    }

    /// Inclusive end of the first window, `None` when no range is sent.
    pub(crate) fn first_end(self) -> Option<u64> {
        match self.block_size() {
            0 => None,
            n => Some(n - 1),
        }
    }
}

/// `range` field value for `[start, end]`, open-ended without an end.
pub(crate) fn range_value(start: u64, end: Option<u64>) -> String {
    match end {
        Some(end) => format!("bytes={start}-{end}"),
        None => format!("bytes={start}-"),
    }
}

// ── Protocol versions ───────────────────────────────────────────────

/// QUIC version selectors. `None` everywhere offers the engine's default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuicVersions {
    /// IETF draft number, offered as `0xff00_0000 | draft`.
    pub draft: Option<u32>,
    /// Handshake protocol as a TLS version code. Only TLS 1.3 (`0x0304`) is
    /// supported.
    pub handshake: Option<u32>,
    /// Wire version to offer. Takes precedence over `draft`.
    pub transport: Option<u32>,
}

impl QuicVersions {
    /// The single version to pin, if any.
    pub(crate) fn resolve(self) -> Result<Option<u32>> {
        if self.handshake.is_some_and(|h| h != TLS13) {
            return Err(Error::InvalidParam);
        }
        // Draft versions occupy the low byte.
        if self.draft.is_some_and(|d| d > 0xff) {
            return Err(Error::InvalidParam);
        }
        Ok(self.transport.or_else(|| self.draft.map(|d| 0xff00_0000 | d)))
    }
}

// ── Caller-facing options ───────────────────────────────────────────

/// Parameters for [`Client::open`](crate::Client::open).
#[derive(Debug, Clone)]
pub struct OpenOptions {
    pub(crate) url: String,
    pub(crate) ip: Option<String>,
    pub(crate) port: Option<u16>,
    pub(crate) method: String,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Vec<u8>,
    pub(crate) verify_identity: bool,
    pub(crate) versions: QuicVersions,
    pub(crate) window: Window,
    pub(crate) hint: Option<u64>,
}

impl OpenOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ip: None,
            port: None,
            method: "GET".to_owned(),
            headers: Vec::new(),
            body: Vec::new(),
            verify_identity: true,
            versions: QuicVersions::default(),
            window: Window::Default,
            hint: None,
        }
    }

    /// Connect to this address instead of resolving the url's host.
    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    /// Connect to this port instead of the url's.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// `false` opts this session into accepting any server certificate.
    pub fn verify_identity(mut self, verify: bool) -> Self {
        self.verify_identity = verify;
        self
    }

    pub fn versions(mut self, versions: QuicVersions) -> Self {
        self.versions = versions;
        self
    }

    pub fn window(mut self, window: Window) -> Self {
        self.window = window;
        self
    }

    /// Minimum look-ahead the prefetcher keeps in flight, in bytes.
    pub fn consumption_hint(mut self, bytes: u64) -> Self {
        self.hint = Some(bytes);
        self
    }
}

/// Parameters for [`Client::request`](crate::Client::request): a different
/// resource on the same connection.
#[derive(Debug, Clone)]
pub struct Request {
    pub(crate) url: String,
    pub(crate) method: String,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Vec<u8>,
}

impl Request {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_owned(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }
}

// ── Resolved session ────────────────────────────────────────────────

/// The parts of a url a request is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Target {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub authority: String,
    pub path: String,
}

impl Target {
    pub fn parse(url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|_| Error::InvalidParam)?;
        let host = url.host_str().ok_or(Error::InvalidParam)?.to_owned();
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.clone(),
        };
        let path = match url.query() {
            Some(q) => format!("{}?{q}", url.path()),
            None => url.path().to_owned(),
        };
        Ok(Self {
            scheme: url.scheme().to_owned(),
            port: url.port_or_known_default().unwrap_or(443),
            host,
            authority,
            path,
        })
    }
}

/// Moments of the session's setup, for [`Stats`](crate::Stats).
#[derive(Debug, Clone, Copy)]
pub(crate) struct Marks {
    pub start: Instant,
    pub resolved: Option<Instant>,
    pub connected: Option<Instant>,
}

impl Marks {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            resolved: None,
            connected: None,
        }
    }
}

/// A resource request as it is replayed for every range.
#[derive(Debug, Clone)]
pub(crate) struct Session {
    pub target: Target,
    pub method: String,
    pub extra: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub window: Window,
    pub hint: Option<u64>,
    pub headers: HeaderBlock,
    pub marks: Marks,
}

/// Peer address: the override when given, otherwise the first resolved one.
pub(crate) fn resolve_peer(target: &Target, ip: Option<&str>, port: Option<u16>) -> Result<SocketAddr> {
    let port = port.filter(|p| *p > 0).unwrap_or(target.port);
    if let Some(ip) = ip {
        let ip: IpAddr = ip.trim().parse().map_err(|_| Error::InvalidParam)?;
        return Ok(SocketAddr::new(ip, port));
    }
    let peer = (target.host.as_str(), port)
        .to_socket_addrs()
        .map_err(|e| {
            debug!(host = %target.host, error = %e, "resolve failed");
            Error::ResolveFail
        })?
        .next()
        .ok_or(Error::ResolveFail)?;
    Ok(peer)
}

/// Trim caller fields, drop empty ones and lower-case names. A caller
/// `range` is dropped; ranges are always set per request. Pseudo-fields
/// come from the url and method only.
pub(crate) fn normalize_headers(headers: &[(String, String)]) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(n, v)| (n.trim().to_ascii_lowercase(), v.trim().to_owned()))
        .filter(|(n, v)| {
            !n.is_empty() && !v.is_empty() && n != "range" && !n.starts_with(':')
        })
        .collect()
}

/// Pseudo-fields followed by the caller's fields.
pub(crate) fn build_headers(target: &Target, method: &str, extra: &[(String, String)]) -> HeaderBlock {
    let mut headers = HeaderBlock::new();
    headers.push(":method", method);
    headers.push(":scheme", target.scheme.as_str());
    headers.push(":authority", target.authority.as_str());
    headers.push(":path", target.path.as_str());
    for (name, value) in extra {
        headers.push(name.as_str(), value.as_str());
    }
    headers
}
