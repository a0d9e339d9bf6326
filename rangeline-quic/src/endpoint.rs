use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use quinn_proto::{
    ClientConfig, ConnectionHandle, DatagramEvent, Dir, Event, StreamEvent, StreamId, VarInt,
    WriteError,
};
use slab::Slab;
use tracing::{debug, trace};

use crate::config::QuicConfig;
use crate::error::Error;
use crate::event::{QuicConnId, QuicEvent};

/// A client-side, sans-IO QUIC endpoint.
///
/// Wraps [`quinn_proto::Endpoint`] and exposes an event-queue API. The
/// endpoint never touches a socket: callers feed incoming datagrams, drain
/// outgoing ones and drive timers, usually through
/// [`UdpDriver`](crate::UdpDriver).
///
/// # Usage
///
/// 1. Feed incoming UDP datagrams via [`handle_datagram`](Self::handle_datagram).
/// 2. Drive connection timers via [`drive_timers`](Self::drive_timers).
/// 3. Poll application events via [`poll_event`](Self::poll_event).
/// 4. Flush and drain outgoing packets via [`flush`](Self::flush) and
///    [`poll_send`](Self::poll_send).
///
/// More than one connection can live in the endpoint at a time: a closed
/// connection stays in the slab while it drains, even if the caller has
/// already dialled a replacement.
pub struct QuicEndpoint {
    endpoint: quinn_proto::Endpoint,
    connections: Slab<QuicConnection>,
    /// quinn handle → slab key.
    by_handle: HashMap<ConnectionHandle, usize>,
    events: VecDeque<QuicEvent>,
    /// Datagrams waiting for the socket, bounded by `send_queue_capacity`.
    send_queue: VecDeque<(SocketAddr, Vec<u8>)>,
    /// Scratch buffer for `poll_transmit`.
    transmit_buf: Vec<u8>,
    /// Scratch buffer for `endpoint.handle()` responses.
    response_buf: Vec<u8>,
    local_addr: SocketAddr,
    client_config: ClientConfig,
    send_queue_capacity: usize,
}

struct QuicConnection {
    handle: ConnectionHandle,
    conn: quinn_proto::Connection,
    established: bool,
}

/// Path statistics for a single connection, copied out of quinn-proto.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PathSnapshot {
    /// Smoothed round-trip time.
    pub rtt: Duration,
    /// Current congestion window in bytes.
    pub cwnd: u64,
    /// Packets declared lost.
    pub lost_packets: u64,
    /// Packets sent.
    pub sent_packets: u64,
    /// Congestion events (loss or ECN) seen by the controller.
    pub congestion_events: u64,
}

impl QuicEndpoint {
    /// Create a new client endpoint.
    ///
    /// `local_addr` is the address of the UDP socket this endpoint is bound to.
    pub fn new(config: QuicConfig, local_addr: SocketAddr) -> Self {
        let endpoint = quinn_proto::Endpoint::new(
            config.endpoint_config,
            None,
            config.allow_mtud,
            config.rng_seed,
        );

        Self {
            endpoint,
            connections: Slab::new(),
            by_handle: HashMap::new(),
            events: VecDeque::new(),
            send_queue: VecDeque::new(),
            transmit_buf: Vec::with_capacity(1500),
            response_buf: Vec::with_capacity(1500),
            local_addr,
            client_config: config.client_config,
            send_queue_capacity: config.send_queue_capacity,
        }
    }

    /// Feed an incoming UDP datagram to the QUIC state machine.
    pub fn handle_datagram(&mut self, now: Instant, data: &[u8], peer: SocketAddr) {
        let data = BytesMut::from(data);
        let event = self.endpoint.handle(
            now,
            peer,
            Some(self.local_addr.ip()),
            None,
            data,
            &mut self.response_buf,
        );

        match event {
            Some(DatagramEvent::ConnectionEvent(ch, event)) => {
                if let Some(&key) = self.by_handle.get(&ch) {
                    self.connections[key].conn.handle_event(event);
                    self.poll_connection(key, now);
                }
            }
            Some(DatagramEvent::NewConnection(incoming)) => {
                // Client endpoints have no server config; never accept.
                trace!(%peer, "ignoring inbound connection attempt");
                self.endpoint.ignore(incoming);
            }
            Some(DatagramEvent::Response(transmit)) => {
                // Stateless response (e.g. stateless reset).
                let data = self.response_buf[..transmit.size].to_vec();
                self.queue_packet(transmit.destination, data);
            }
            None => {}
        }
    }

    /// Fire expired per-connection timeouts.
    pub fn drive_timers(&mut self, now: Instant) {
        for key in self.keys() {
            let Some(c) = self.connections.get_mut(key) else {
                continue;
            };
            if c.conn.poll_timeout().is_some_and(|t| t <= now) {
                c.conn.handle_timeout(now);
                self.poll_connection(key, now);
            }
        }
    }

    /// Pull pending transmits and events out of every connection.
    ///
    /// Stream writes, finishes and resets only schedule frames; call this
    /// before draining [`poll_send`](Self::poll_send) so they go out without
    /// waiting for the next datagram or timer.
    pub fn flush(&mut self, now: Instant) {
        for key in self.keys() {
            if self.connections.contains(key) {
                self.poll_connection(key, now);
            }
        }
    }

    /// Earliest timer deadline across all connections.
    pub fn next_timeout(&mut self) -> Option<Instant> {
        self.connections
            .iter_mut()
            .filter_map(|(_, c)| c.conn.poll_timeout())
            .min()
    }

    /// Poll the next application event.
    ///
    /// Returns `None` when no more events are queued.
    pub fn poll_event(&mut self) -> Option<QuicEvent> {
        self.events.pop_front()
    }

    /// Poll the next outgoing UDP packet.
    ///
    /// Returns `(destination, data)` or `None` when the send queue is empty.
    pub fn poll_send(&mut self) -> Option<(SocketAddr, Vec<u8>)> {
        self.send_queue.pop_front()
    }

    /// Initiate an outbound QUIC connection.
    ///
    /// Returns a [`QuicConnId`] that will appear in a future
    /// [`QuicEvent::Connected`] event once the handshake completes.
    pub fn connect(
        &mut self,
        now: Instant,
        peer: SocketAddr,
        server_name: &str,
    ) -> Result<QuicConnId, Error> {
        let (ch, conn) =
            self.endpoint
                .connect(now, self.client_config.clone(), peer, server_name)?;

        let key = self.insert_connection(ch, conn);
        debug!(%peer, server_name, conn = key, "dialling");
        self.drain_transmits(key, now);
        Ok(QuicConnId(key as u32))
    }

    /// Whether the handshake for `conn` has completed and it is still alive.
    pub fn is_established(&self, conn: QuicConnId) -> bool {
        self.connections
            .get(conn.index())
            .is_some_and(|c| c.established && !c.conn.is_closed())
    }

    /// Write data to a QUIC stream.
    ///
    /// Returns the number of bytes written, which may be less than
    /// `data.len()` (or zero) when flow control is exhausted. A
    /// [`QuicEvent::StreamWritable`] follows once credit returns.
    pub fn stream_send(
        &mut self,
        conn: QuicConnId,
        stream: StreamId,
        data: &[u8],
    ) -> Result<usize, Error> {
        let c = self.get_conn_mut(conn)?;
        match c.conn.send_stream(stream).write(data) {
            Ok(n) => Ok(n),
            Err(WriteError::Blocked) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Read data from a QUIC stream into `buf`.
    ///
    /// Returns `(bytes_read, is_finished)`. A peer reset surfaces as
    /// [`Error::Reset`].
    pub fn stream_recv(
        &mut self,
        conn: QuicConnId,
        stream: StreamId,
        buf: &mut [u8],
    ) -> Result<(usize, bool), Error> {
        let c = self.get_conn_mut(conn)?;
        let mut recv = c.conn.recv_stream(stream);
        let mut chunks = recv.read(true)?;
        let mut total = 0;
        let mut finished = false;

        while total < buf.len() {
            match chunks.next(buf.len() - total) {
                Ok(Some(chunk)) => {
                    let len = chunk.bytes.len();
                    buf[total..total + len].copy_from_slice(&chunk.bytes);
                    total += len;
                }
                Ok(None) => {
                    finished = true;
                    break;
                }
                Err(quinn_proto::ReadError::Blocked) => break,
                Err(e) => {
                    let _ = chunks.finalize();
                    return Err(e.into());
                }
            }
        }
        let _ = chunks.finalize();
        Ok((total, finished))
    }

    /// Send FIN on a stream, indicating no more data will be sent.
    pub fn stream_finish(&mut self, conn: QuicConnId, stream: StreamId) -> Result<(), Error> {
        let c = self.get_conn_mut(conn)?;
        c.conn
            .send_stream(stream)
            .finish()
            .map_err(|_| Error::ClosedStream)
    }

    /// Abandon a bidirectional stream in both directions.
    ///
    /// Sends RESET_STREAM for our half and STOP_SENDING for the peer's half,
    /// both carrying `code`. Halves that are already closed are skipped.
    pub fn stream_reset(
        &mut self,
        conn: QuicConnId,
        stream: StreamId,
        code: u64,
    ) -> Result<(), Error> {
        let code = VarInt::from_u64(code).map_err(|_| Error::ClosedStream)?;
        let c = self.get_conn_mut(conn)?;
        let sent = c.conn.send_stream(stream).reset(code).is_ok();
        let stopped = c.conn.recv_stream(stream).stop(code).is_ok();
        trace!(conn = conn.index(), %stream, sent, stopped, "stream reset");
        Ok(())
    }

    /// Open a bidirectional stream.
    ///
    /// Returns `None` if the peer's stream concurrency limit has been reached.
    pub fn open_bi(&mut self, conn: QuicConnId) -> Result<Option<StreamId>, Error> {
        let c = self.get_conn_mut(conn)?;
        Ok(c.conn.streams().open(Dir::Bi))
    }

    /// Open a unidirectional stream.
    ///
    /// Returns `None` if the peer's stream concurrency limit has been reached.
    pub fn open_uni(&mut self, conn: QuicConnId) -> Result<Option<StreamId>, Error> {
        let c = self.get_conn_mut(conn)?;
        Ok(c.conn.streams().open(Dir::Uni))
    }

    /// Close a QUIC connection with the given error code and reason.
    pub fn close_connection(&mut self, conn: QuicConnId, code: u32, reason: &[u8]) {
        let now = Instant::now();
        if let Ok(c) = self.get_conn_mut(conn) {
            c.conn
                .close(now, VarInt::from_u32(code), Bytes::copy_from_slice(reason));
            self.drain_transmits(conn.index(), now);
        }
    }

    /// Path statistics for a connection.
    pub fn stats(&self, conn: QuicConnId) -> Result<PathSnapshot, Error> {
        let c = self
            .connections
            .get(conn.index())
            .ok_or(Error::InvalidConnection)?;
        let stats = c.conn.stats();
        Ok(PathSnapshot {
            rtt: stats.path.rtt,
            cwnd: stats.path.cwnd,
            lost_packets: stats.path.lost_packets,
            sent_packets: stats.path.sent_packets,
            congestion_events: stats.path.congestion_events,
        })
    }

    /// Number of connections in the endpoint, including draining ones.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Peer address for a connection, if it exists.
    pub fn remote_addr(&self, conn: QuicConnId) -> Option<SocketAddr> {
        self.connections
            .get(conn.index())
            .map(|c| c.conn.remote_address())
    }

    // ── Internal helpers ─────────────────────────────────────────────

    /// Slab keys snapshot; connections may be removed while iterating.
    fn keys(&self) -> Vec<usize> {
        self.connections.iter().map(|(k, _)| k).collect()
    }

    fn insert_connection(&mut self, ch: ConnectionHandle, conn: quinn_proto::Connection) -> usize {
        let key = self.connections.insert(QuicConnection {
            handle: ch,
            conn,
            established: false,
        });
        self.by_handle.insert(ch, key);
        key
    }

    fn get_conn_mut(&mut self, conn: QuicConnId) -> Result<&mut QuicConnection, Error> {
        self.connections
            .get_mut(conn.index())
            .ok_or(Error::InvalidConnection)
    }

    fn drain_transmits(&mut self, key: usize, now: Instant) {
        self.transmit_buf.clear();
        while let Some(t) = self.connections[key]
            .conn
            .poll_transmit(now, 1, &mut self.transmit_buf)
        {
            let data = self.transmit_buf[..t.size].to_vec();
            self.transmit_buf.clear();
            self.queue_packet(t.destination, data);
        }
    }

    /// Drain endpoint events, transmits and application events from a connection.
    fn poll_connection(&mut self, key: usize, now: Instant) {
        while let Some(event) = self.connections[key].conn.poll_endpoint_events() {
            if let Some(conn_event) = self
                .endpoint
                .handle_event(self.connections[key].handle, event)
            {
                self.connections[key].conn.handle_event(conn_event);
            }
        }

        self.drain_transmits(key, now);

        let conn_id = QuicConnId(key as u32);
        while let Some(event) = self.connections[key].conn.poll() {
            match event {
                Event::Connected => {
                    self.connections[key].established = true;
                    self.events.push_back(QuicEvent::Connected(conn_id));
                }
                Event::ConnectionLost { reason } => {
                    debug!(conn = key, %reason, "connection lost");
                    self.events.push_back(QuicEvent::ConnectionClosed {
                        conn: conn_id,
                        reason,
                    });
                    self.remove_connection(key);
                    return;
                }
                Event::Stream(StreamEvent::Opened { dir }) => {
                    let streams = &mut self.connections[key].conn;
                    while let Some(stream) = streams.streams().accept(dir) {
                        self.events.push_back(QuicEvent::StreamOpened {
                            conn: conn_id,
                            stream,
                            bidi: dir == Dir::Bi,
                        });
                    }
                }
                Event::Stream(event) => self.events.extend(stream_event(conn_id, event)),
                Event::HandshakeDataReady | Event::DatagramReceived | Event::DatagramsUnblocked => {}
            }
        }

        self.drain_transmits(key, now);

        if self.connections.contains(key) && self.connections[key].conn.is_drained() {
            self.remove_connection(key);
        }
    }

    fn remove_connection(&mut self, key: usize) {
        let removed = self.connections.remove(key);
        self.by_handle.remove(&removed.handle);
    }

    fn queue_packet(&mut self, destination: SocketAddr, data: Vec<u8>) {
        if self.send_queue.len() >= self.send_queue_capacity {
            trace!(%destination, "send queue full, dropping packet");
            return;
        }
        self.send_queue.push_back((destination, data));
    }
}

/// Per-stream quinn event as seen by the application. `Opened` needs the
/// connection to accept streams and is handled by the caller.
fn stream_event(conn: QuicConnId, event: StreamEvent) -> Option<QuicEvent> {
    Some(match event {
        StreamEvent::Readable { id } => QuicEvent::StreamReadable { conn, stream: id },
        StreamEvent::Writable { id } => QuicEvent::StreamWritable { conn, stream: id },
        StreamEvent::Finished { id } => QuicEvent::StreamFinished { conn, stream: id },
        StreamEvent::Stopped { id, error_code } => QuicEvent::StreamStopped {
            conn,
            stream: id,
            code: error_code.into_inner(),
        },
        StreamEvent::Opened { .. } | StreamEvent::Available { .. } => return None,
    })
}
