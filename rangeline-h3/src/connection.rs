//! Client-side HTTP/3 connection state machine.
//!
//! `H3Client` sits on top of a `QuicEndpoint`, turning QUIC stream events
//! into response events. Response bodies are surfaced incrementally: each
//! readable event yields whatever part of the current DATA frame has
//! arrived, so a large ranged response never has to be buffered whole.

use std::collections::{HashMap, VecDeque};

use rangeline_quic::{ConnectionError, QuicConnId, QuicEndpoint, QuicEvent, StreamId};
use tracing::{debug, trace, warn};

use crate::error::{H3Error, codes};
use crate::frame::{self, FRAME_DATA, Frame};
use crate::qpack::{self, HeaderField};
use crate::settings::Settings;
use crate::stream::{RequestStream, StreamState};

/// HTTP/3 uni-stream type identifiers (RFC 9114 Section 6.2).
const STREAM_TYPE_CONTROL: u64 = 0x00;
const STREAM_TYPE_PUSH: u64 = 0x01;
const STREAM_TYPE_QPACK_ENCODER: u64 = 0x02;
const STREAM_TYPE_QPACK_DECODER: u64 = 0x03;

/// Events produced by the HTTP/3 client for the application.
#[derive(Debug)]
pub enum H3Event {
    /// Final (non-1xx) response headers for a request.
    Response {
        stream_id: StreamId,
        headers: Vec<HeaderField>,
        end_stream: bool,
    },
    /// A chunk of response body.
    Data {
        stream_id: StreamId,
        data: Vec<u8>,
        end_stream: bool,
    },
    /// The stream ended abnormally: reset by the peer, or aborted locally
    /// because the response was malformed.
    Reset { stream_id: StreamId, code: u64 },
    /// Peer sent GOAWAY; no new requests will be served.
    GoAway { id: u64 },
    /// The QUIC connection went away. `unfinished` lists request streams
    /// that never delivered `end_stream`.
    Closed {
        reason: ConnectionError,
        unfinished: Vec<StreamId>,
    },
    /// Connection-level protocol error. The connection has been closed.
    Error(H3Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum H3State {
    /// `start` not called yet.
    Idle,
    /// Control stream opened; requests may be sent.
    Open,
    /// GOAWAY received.
    Closing,
    Closed,
}

/// Client-side HTTP/3 connection.
///
/// Call [`start`](Self::start) once the QUIC handshake completes, feed every
/// `QuicEvent` through [`handle_quic_event`](Self::handle_quic_event) and
/// drain [`poll_event`](Self::poll_event).
pub struct H3Client {
    state: H3State,
    local_settings: Settings,
    remote_settings: Option<Settings>,
    conn_id: Option<QuicConnId>,

    /// Live request streams, keyed by QUIC stream ID bits.
    requests: HashMap<u64, RequestStream>,

    /// Peer's control stream.
    peer_control: Option<StreamId>,
    control_recv_buf: Vec<u8>,
    /// Peer uni streams whose type varint has not fully arrived.
    pending_uni: HashMap<u64, Vec<u8>>,

    events: VecDeque<H3Event>,
    read_buf: Vec<u8>,
}

impl H3Client {
    pub fn new(settings: Settings) -> Self {
        Self {
            state: H3State::Idle,
            local_settings: settings,
            remote_settings: None,
            conn_id: None,
            requests: HashMap::new(),
            peer_control: None,
            control_recv_buf: Vec::new(),
            pending_uni: HashMap::new(),
            events: VecDeque::new(),
            read_buf: vec![0u8; 65536],
        }
    }

    /// Bind to an established QUIC connection: open our control stream and
    /// send SETTINGS.
    pub fn start(&mut self, quic: &mut QuicEndpoint, conn: QuicConnId) -> Result<(), H3Error> {
        let stream = quic
            .open_uni(conn)?
            .ok_or_else(|| H3Error::Internal("cannot open control stream".into()))?;

        let mut buf = Vec::new();
        frame::encode_varint(&mut buf, STREAM_TYPE_CONTROL);
        Frame::Settings(self.local_settings.clone()).encode(&mut buf);
        // The control stream stays open for the life of the connection.
        quic.stream_send(conn, stream, &buf)?;

        self.conn_id = Some(conn);
        self.state = H3State::Open;
        debug!(conn = conn.index(), "h3 control stream open");
        Ok(())
    }

    /// Whether new requests can be sent.
    pub fn is_open(&self) -> bool {
        self.state == H3State::Open
    }

    /// SETTINGS received from the server, once its control stream delivers them.
    pub fn remote_settings(&self) -> Option<&Settings> {
        self.remote_settings.as_ref()
    }

    pub fn poll_event(&mut self) -> Option<H3Event> {
        self.events.pop_front()
    }

    /// Open a request stream and send HEADERS, plus a DATA frame when `body`
    /// is non-empty. Bytes beyond the stream's flow-control credit are held
    /// and written when the stream becomes writable again.
    pub fn send_request(
        &mut self,
        quic: &mut QuicEndpoint,
        headers: &[HeaderField],
        body: &[u8],
        end_stream: bool,
    ) -> Result<StreamId, H3Error> {
        let conn = self.conn()?;
        if self.state != H3State::Open {
            return Err(H3Error::Internal("connection is not accepting requests".into()));
        }
        let stream = quic.open_bi(conn)?.ok_or(H3Error::StreamBlocked)?;

        let mut encoded = Vec::new();
        qpack::encode(headers, &mut encoded);
        let mut buf = Vec::new();
        Frame::Headers { encoded }.encode(&mut buf);
        if !body.is_empty() {
            frame::encode_frame_header(&mut buf, FRAME_DATA, body.len() as u64);
            buf.extend_from_slice(body);
        }

        let mut rs = RequestStream::new(stream, buf, end_stream);
        flush_request(quic, conn, &mut rs)?;
        trace!(%stream, pending = rs.send_buf.len(), "request sent");
        self.requests.insert(u64::from(stream), rs);
        Ok(stream)
    }

    /// Abandon a request: reset our half, stop the peer's half and forget the
    /// stream. No further events are produced for it.
    pub fn cancel(
        &mut self,
        quic: &mut QuicEndpoint,
        stream: StreamId,
        code: u64,
    ) -> Result<(), H3Error> {
        let conn = self.conn()?;
        if self.requests.remove(&u64::from(stream)).is_some() {
            quic.stream_reset(conn, stream, code)?;
        }
        Ok(())
    }

    /// Close the QUIC connection with `H3_NO_ERROR`.
    pub fn shutdown(&mut self, quic: &mut QuicEndpoint) {
        if let Some(conn) = self.conn_id
            && self.state != H3State::Closed
        {
            quic.close_connection(conn, codes::H3_NO_ERROR as u32, b"");
            self.state = H3State::Closed;
        }
    }

    /// Process a QUIC event and update HTTP/3 state.
    pub fn handle_quic_event(
        &mut self,
        quic: &mut QuicEndpoint,
        event: &QuicEvent,
    ) -> Result<(), H3Error> {
        match event {
            QuicEvent::StreamOpened { conn, stream, bidi } => {
                if self.conn_id != Some(*conn) {
                    return Ok(());
                }
                if *bidi {
                    // Servers never open request streams.
                    quic.stream_reset(*conn, *stream, codes::H3_STREAM_CREATION_ERROR)?;
                } else {
                    self.pending_uni.insert(u64::from(*stream), Vec::new());
                    self.identify_uni_stream(quic, *conn, *stream)?;
                }
            }
            QuicEvent::StreamReadable { conn, stream } => {
                if self.conn_id == Some(*conn) {
                    self.handle_stream_readable(quic, *conn, *stream)?;
                }
            }
            QuicEvent::StreamWritable { conn, stream } => {
                if self.conn_id == Some(*conn)
                    && let Some(rs) = self.requests.get_mut(&u64::from(*stream))
                {
                    flush_request(quic, *conn, rs)?;
                }
            }
            QuicEvent::ConnectionClosed { conn, reason } => {
                if self.conn_id == Some(*conn) && self.state != H3State::Closed {
                    self.state = H3State::Closed;
                    let unfinished = self.requests.drain().map(|(_, rs)| rs.id).collect();
                    self.events.push_back(H3Event::Closed {
                        reason: reason.clone(),
                        unfinished,
                    });
                }
            }
            QuicEvent::Connected(_)
            | QuicEvent::StreamFinished { .. }
            | QuicEvent::StreamStopped { .. } => {}
        }
        Ok(())
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn conn(&self) -> Result<QuicConnId, H3Error> {
        self.conn_id
            .ok_or_else(|| H3Error::Internal("no connection".into()))
    }

    fn handle_stream_readable(
        &mut self,
        quic: &mut QuicEndpoint,
        conn: QuicConnId,
        stream: StreamId,
    ) -> Result<(), H3Error> {
        let key = u64::from(stream);
        if self.pending_uni.contains_key(&key) {
            return self.identify_uni_stream(quic, conn, stream);
        }
        if self.peer_control == Some(stream) {
            return self.read_control_stream(quic, conn, stream);
        }
        if self.requests.contains_key(&key) {
            return self.read_request_stream(quic, conn, stream);
        }
        // QPACK streams, cancelled requests and ignored uni streams: discard.
        while let Ok((n, fin)) = quic.stream_recv(conn, stream, &mut self.read_buf) {
            if n == 0 || fin {
                break;
            }
        }
        Ok(())
    }

    fn identify_uni_stream(
        &mut self,
        quic: &mut QuicEndpoint,
        conn: QuicConnId,
        stream: StreamId,
    ) -> Result<(), H3Error> {
        let key = u64::from(stream);
        let Some(mut partial) = self.pending_uni.remove(&key) else {
            return Ok(());
        };
        if let Ok((n, _fin)) = quic.stream_recv(conn, stream, &mut self.read_buf) {
            partial.extend_from_slice(&self.read_buf[..n]);
        }
        let Some((stream_type, consumed)) = frame::decode_varint(&partial) else {
            self.pending_uni.insert(key, partial);
            return Ok(());
        };

        match stream_type {
            STREAM_TYPE_CONTROL => {
                if self.peer_control.is_some() {
                    self.fail(quic, conn, H3Error::FrameUnexpected);
                    return Ok(());
                }
                self.peer_control = Some(stream);
                self.control_recv_buf.extend_from_slice(&partial[consumed..]);
                self.read_control_stream(quic, conn, stream)?;
            }
            STREAM_TYPE_PUSH => {
                // Push was never enabled (no MAX_PUSH_ID sent).
                quic.stream_reset(conn, stream, codes::H3_ID_ERROR)?;
            }
            STREAM_TYPE_QPACK_ENCODER | STREAM_TYPE_QPACK_DECODER => {
                trace!(%stream, stream_type, "qpack stream ignored");
            }
            other => {
                trace!(%stream, stream_type = other, "unknown uni stream");
                quic.stream_reset(conn, stream, codes::H3_STREAM_CREATION_ERROR)?;
            }
        }
        Ok(())
    }

    fn read_control_stream(
        &mut self,
        quic: &mut QuicEndpoint,
        conn: QuicConnId,
        stream: StreamId,
    ) -> Result<(), H3Error> {
        loop {
            let Ok((n, fin)) = quic.stream_recv(conn, stream, &mut self.read_buf) else {
                break;
            };
            self.control_recv_buf
                .extend_from_slice(&self.read_buf[..n]);
            if fin {
                self.fail(quic, conn, H3Error::ClosedCriticalStream);
                return Ok(());
            }
            if n == 0 {
                break;
            }
        }

        let mut offset = 0;
        let result = loop {
            match frame::decode_frame(&self.control_recv_buf[offset..]) {
                Ok(Some((frame, consumed))) => {
                    offset += consumed;
                    match frame {
                        Frame::Settings(settings) => {
                            if self.remote_settings.is_some() {
                                break Err(H3Error::FrameUnexpected);
                            }
                            debug!(?settings, "peer settings");
                            self.remote_settings = Some(settings);
                        }
                        _ if self.remote_settings.is_none() => {
                            // SETTINGS must be the first control frame.
                            break Err(H3Error::FrameUnexpected);
                        }
                        Frame::GoAway { id } => {
                            debug!(id, "peer sent GOAWAY");
                            if self.state == H3State::Open {
                                self.state = H3State::Closing;
                            }
                            self.events.push_back(H3Event::GoAway { id });
                        }
                        Frame::Data { .. } | Frame::Headers { .. } => {
                            break Err(H3Error::FrameUnexpected);
                        }
                        Frame::Push { .. } | Frame::Unknown { .. } => {}
                    }
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        self.control_recv_buf.drain(..offset);

        if let Err(e) = result {
            self.fail(quic, conn, e);
        }
        Ok(())
    }

    fn read_request_stream(
        &mut self,
        quic: &mut QuicEndpoint,
        conn: QuicConnId,
        stream: StreamId,
    ) -> Result<(), H3Error> {
        let Some(mut rs) = self.requests.remove(&u64::from(stream)) else {
            return Ok(());
        };

        let mut fin = false;
        loop {
            match quic.stream_recv(conn, stream, &mut self.read_buf) {
                Ok((n, f)) => {
                    rs.recv_buf.extend_from_slice(&self.read_buf[..n]);
                    fin = f;
                    if n == 0 || f {
                        break;
                    }
                }
                Err(rangeline_quic::Error::Reset(code)) => {
                    debug!(%stream, code, "response stream reset by peer");
                    self.events.push_back(H3Event::Reset {
                        stream_id: stream,
                        code,
                    });
                    return Ok(());
                }
                Err(e) => {
                    trace!(%stream, error = %e, "stream read stopped");
                    break;
                }
            }
        }

        match self.process_response(&mut rs, fin) {
            Ok(true) => {}
            Ok(false) => {
                self.requests.insert(u64::from(stream), rs);
            }
            Err(e) => {
                let code = match e {
                    H3Error::FrameUnexpected => codes::H3_FRAME_UNEXPECTED,
                    _ => codes::H3_MESSAGE_ERROR,
                };
                warn!(%stream, error = %e, "malformed response, aborting stream");
                quic.stream_reset(conn, stream, code)?;
                self.events.push_back(H3Event::Reset {
                    stream_id: stream,
                    code,
                });
            }
        }
        Ok(())
    }

    /// Parse buffered frames on a request stream. Returns `Ok(true)` once the
    /// stream is complete.
    fn process_response(&mut self, rs: &mut RequestStream, fin: bool) -> Result<bool, H3Error> {
        let buf = std::mem::take(&mut rs.recv_buf);
        let mut offset = 0;

        while offset < buf.len() {
            if rs.data_remaining > 0 {
                let remaining = usize::try_from(rs.data_remaining).unwrap_or(usize::MAX);
                let take = (buf.len() - offset).min(remaining);
                let data = buf[offset..offset + take].to_vec();
                offset += take;
                rs.data_remaining -= take as u64;
                let end_stream = fin && offset == buf.len() && rs.data_remaining == 0;
                if end_stream {
                    rs.state = StreamState::Finished;
                }
                self.events.push_back(H3Event::Data {
                    stream_id: rs.id,
                    data,
                    end_stream,
                });
                continue;
            }

            let Some(header) = frame::decode_header(&buf[offset..])? else {
                break;
            };
            if header.frame_type == FRAME_DATA {
                if rs.state != StreamState::Receiving {
                    return Err(H3Error::FrameUnexpected);
                }
                offset += header.header_len;
                rs.data_remaining = header.payload_len;
                continue;
            }

            let Some((frame, consumed)) = frame::decode_frame(&buf[offset..])? else {
                break;
            };
            offset += consumed;
            match frame {
                Frame::Headers { encoded } => {
                    let headers = qpack::decode(&encoded)?;
                    if rs.state == StreamState::AwaitingResponse {
                        let status = headers
                            .iter()
                            .find(|h| h.name == b":status")
                            .ok_or(H3Error::QpackDecodingFailed)?;
                        if status.value.first() == Some(&b'1') {
                            trace!(stream = %rs.id, "informational response skipped");
                            continue;
                        }
                        let end_stream = fin && offset == buf.len();
                        rs.state = if end_stream {
                            StreamState::Finished
                        } else {
                            StreamState::Receiving
                        };
                        self.events.push_back(H3Event::Response {
                            stream_id: rs.id,
                            headers,
                            end_stream,
                        });
                    }
                    // Trailers are dropped.
                }
                Frame::Settings(_) | Frame::GoAway { .. } | Frame::Push { .. } => {
                    return Err(H3Error::FrameUnexpected);
                }
                Frame::Data { .. } | Frame::Unknown { .. } => {}
            }
        }

        rs.recv_buf = buf[offset..].to_vec();

        if fin && rs.recv_buf.is_empty() && rs.data_remaining == 0 {
            if rs.state == StreamState::AwaitingResponse {
                return Err(H3Error::Internal("stream ended without a response".into()));
            }
            if rs.state != StreamState::Finished {
                rs.state = StreamState::Finished;
                self.events.push_back(H3Event::Data {
                    stream_id: rs.id,
                    data: Vec::new(),
                    end_stream: true,
                });
            }
            return Ok(true);
        }
        if fin {
            // FIN inside a frame.
            return Err(H3Error::FrameError);
        }
        Ok(false)
    }

    /// Connection-level failure: close the QUIC connection and report.
    fn fail(&mut self, quic: &mut QuicEndpoint, conn: QuicConnId, error: H3Error) {
        warn!(error = %error, "h3 connection error");
        quic.close_connection(conn, error.code() as u32, b"");
        self.state = H3State::Closed;
        let unfinished: Vec<StreamId> = self.requests.drain().map(|(_, rs)| rs.id).collect();
        self.events.push_back(H3Event::Error(error));
        if !unfinished.is_empty() {
            self.events.push_back(H3Event::Closed {
                reason: ConnectionError::LocallyClosed,
                unfinished,
            });
        }
    }
}

/// Write as much of a request's pending bytes as flow control allows, then
/// FIN if requested.
fn flush_request(
    quic: &mut QuicEndpoint,
    conn: QuicConnId,
    rs: &mut RequestStream,
) -> Result<(), H3Error> {
    while !rs.send_buf.is_empty() {
        let n = quic.stream_send(conn, rs.id, &rs.send_buf)?;
        if n == 0 {
            return Ok(());
        }
        rs.send_buf.drain(..n);
    }
    if rs.finish_pending {
        quic.stream_finish(conn, rs.id)?;
        rs.finish_pending = false;
    }
    Ok(())
}
