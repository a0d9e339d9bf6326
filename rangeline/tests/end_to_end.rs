//! End-to-end: `Client` over the real HTTP/3 transport against a loopback
//! range server built directly on quinn-proto.

mod common;

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use quinn_proto::{
    ConnectionHandle, DatagramEvent, Dir, Endpoint, EndpointConfig, Event, ServerConfig,
    StreamEvent, StreamId,
};
use rangeline::{
    Client, ClientConfigBuilder, Error, OpenOptions, Verification, Wait, Whence, Window,
    block_prefetcher,
};
use rangeline_h3::{Frame, HeaderField, Settings, frame, qpack};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

use common::{init_tracing, pattern};

static TEST_SERIALIZE: Mutex<()> = Mutex::new(());

const SIZE: usize = 300_000;

// ── TLS ──────────────────────────────────────────────────────────────

fn generate_self_signed() -> (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>) {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let key = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());
    (vec![CertificateDer::from(cert.cert)], key.into())
}

fn server_config(certs: Vec<CertificateDer<'static>>, key: PrivateKeyDer<'static>) -> Arc<ServerConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut tls = rustls::ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .unwrap();
    tls.alpn_protocols = vec![b"h3".to_vec()];
    let crypto = quinn_proto::crypto::rustls::QuicServerConfig::try_from(tls).unwrap();
    Arc::new(ServerConfig::with_crypto(Arc::new(crypto)))
}

// ── Range server ─────────────────────────────────────────────────────

#[derive(Default)]
struct Observed {
    ranges: Vec<Option<String>>,
    stopped: Vec<u64>,
}

/// Serves `pattern(SIZE)` at every path, honouring `range`.
struct RangeServer {
    addr: SocketAddr,
    stop: Arc<AtomicBool>,
    observed: Arc<Mutex<Observed>>,
    thread: Option<JoinHandle<()>>,
}

impl RangeServer {
    fn start(config: Arc<ServerConfig>) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(2)))
            .unwrap();
        let addr = socket.local_addr().unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let observed = Arc::new(Mutex::new(Observed::default()));

        let thread = {
            let stop = stop.clone();
            let observed = observed.clone();
            std::thread::spawn(move || serve(socket, config, &stop, &observed))
        };
        Self {
            addr,
            stop,
            observed,
            thread: Some(thread),
        }
    }

    fn url(&self) -> String {
        format!("https://localhost:{}/video.bin", self.addr.port())
    }

    fn ranges(&self) -> Vec<Option<String>> {
        self.observed.lock().unwrap().ranges.clone()
    }
}

impl Drop for RangeServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

#[derive(Default)]
struct ServerStreams {
    requests: HashMap<StreamId, Vec<u8>>,
    outgoing: HashMap<StreamId, Vec<u8>>,
}

fn serve(socket: UdpSocket, config: Arc<ServerConfig>, stop: &AtomicBool, observed: &Mutex<Observed>) {
    let resource = pattern(SIZE);
    let mut endpoint = Endpoint::new(Arc::new(EndpointConfig::default()), Some(config), true, None);
    let mut conns: HashMap<ConnectionHandle, (quinn_proto::Connection, ServerStreams)> =
        HashMap::new();
    let mut buf = vec![0u8; 65536];
    let mut response = Vec::new();
    let mut transmit = Vec::new();

    while !stop.load(Ordering::Acquire) {
        let now = Instant::now();
        if let Ok((n, peer)) = socket.recv_from(&mut buf) {
            response.clear();
            match endpoint.handle(now, peer, None, None, BytesMut::from(&buf[..n]), &mut response) {
                Some(DatagramEvent::NewConnection(incoming)) => {
                    response.clear();
                    if let Ok((ch, conn)) = endpoint.accept(incoming, now, &mut response, None) {
                        conns.insert(ch, (conn, ServerStreams::default()));
                    }
                }
                Some(DatagramEvent::ConnectionEvent(ch, event)) => {
                    if let Some((conn, _)) = conns.get_mut(&ch) {
                        conn.handle_event(event);
                    }
                }
                Some(DatagramEvent::Response(t)) => {
                    let _ = socket.send_to(&response[..t.size], t.destination);
                }
                None => {}
            }
        }

        for (ch, (conn, streams)) in conns.iter_mut() {
            if conn.poll_timeout().is_some_and(|t| t <= now) {
                conn.handle_timeout(now);
            }
            while let Some(event) = conn.poll_endpoint_events() {
                if let Some(event) = endpoint.handle_event(*ch, event) {
                    conn.handle_event(event);
                }
            }
            while let Some(event) = conn.poll() {
                match event {
                    Event::Connected => {
                        let control = conn.streams().open(Dir::Uni).unwrap();
                        let mut out = Vec::new();
                        frame::encode_varint(&mut out, 0x00);
                        Frame::Settings(Settings::default()).encode(&mut out);
                        conn.send_stream(control).write(&out).unwrap();
                    }
                    Event::Stream(StreamEvent::Opened { dir }) => {
                        while let Some(id) = conn.streams().accept(dir) {
                            if dir == Dir::Bi {
                                streams.requests.insert(id, Vec::new());
                                on_readable(conn, streams, id, &resource, observed);
                            }
                        }
                    }
                    Event::Stream(StreamEvent::Readable { id }) => {
                        on_readable(conn, streams, id, &resource, observed);
                    }
                    Event::Stream(StreamEvent::Writable { id }) => {
                        write_pending(conn, streams, id);
                    }
                    Event::Stream(StreamEvent::Stopped { id, error_code }) => {
                        streams.outgoing.remove(&id);
                        let _ = conn.send_stream(id).reset(error_code);
                        observed.lock().unwrap().stopped.push(error_code.into_inner());
                    }
                    _ => {}
                }
            }
            loop {
                transmit.clear();
                match conn.poll_transmit(now, 1, &mut transmit) {
                    Some(t) => {
                        let _ = socket.send_to(&transmit[..t.size], t.destination);
                    }
                    None => break,
                }
            }
        }
        conns.retain(|_, (c, _)| !c.is_drained());
    }
}

fn header<'a>(headers: &'a [HeaderField], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name == name.as_bytes())
        .and_then(HeaderField::value_str)
}

/// `[start, end]` of a `bytes=` range, clamped to `total`.
fn parse_range(value: &str, total: usize) -> Option<(usize, usize)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    let start: usize = start.parse().ok()?;
    let end = match end {
        "" => total - 1,
        end => end.parse::<usize>().ok()?.min(total - 1),
    };
    (start <= end).then_some((start, end))
}

fn on_readable(
    conn: &mut quinn_proto::Connection,
    streams: &mut ServerStreams,
    id: StreamId,
    resource: &[u8],
    observed: &Mutex<Observed>,
) {
    let mut received = Vec::new();
    {
        let mut recv = conn.recv_stream(id);
        let Ok(mut chunks) = recv.read(true) else {
            return;
        };
        while let Ok(Some(chunk)) = chunks.next(usize::MAX) {
            received.extend_from_slice(&chunk.bytes);
        }
        let _ = chunks.finalize();
    }
    let Some(pending) = streams.requests.get_mut(&id) else {
        return;
    };
    pending.extend_from_slice(&received);

    let Ok(Some((Frame::Headers { encoded }, _))) = frame::decode_frame(pending) else {
        return;
    };
    streams.requests.remove(&id);
    let headers = qpack::decode(&encoded).unwrap();
    let range = header(&headers, "range").map(str::to_owned);
    observed.lock().unwrap().ranges.push(range.clone());

    let total = resource.len();
    let (status, body, mut fields) = match range.as_deref().and_then(|r| parse_range(r, total)) {
        Some((start, end)) => (
            "206",
            &resource[start..=end],
            vec![HeaderField::new("content-range", format!("bytes {start}-{end}/{total}"))],
        ),
        None => ("200", resource, Vec::new()),
    };
    fields.insert(0, HeaderField::new(":status", status));
    fields.push(HeaderField::new("content-length", body.len().to_string()));

    let mut encoded = Vec::new();
    qpack::encode(&fields, &mut encoded);
    let mut out = Vec::new();
    Frame::Headers { encoded }.encode(&mut out);
    for part in body.chunks(50_000) {
        Frame::Data {
            payload: part.to_vec(),
        }
        .encode(&mut out);
    }
    streams.outgoing.insert(id, out);
    write_pending(conn, streams, id);
}

fn write_pending(conn: &mut quinn_proto::Connection, streams: &mut ServerStreams, id: StreamId) {
    let Some(out) = streams.outgoing.get_mut(&id) else {
        return;
    };
    while !out.is_empty() {
        match conn.send_stream(id).write(out) {
            Ok(n) => {
                out.drain(..n);
            }
            Err(_) => return,
        }
    }
    streams.outgoing.remove(&id);
    let _ = conn.send_stream(id).finish();
}

// ── Tests ────────────────────────────────────────────────────────────

fn trusting_client(certs: &[CertificateDer<'static>]) -> Client {
    let config = ClientConfigBuilder::new()
        .connect_timeout(Duration::from_secs(5))
        .verification(Verification::with_roots(certs.iter().cloned()))
        .prefetch(Some(block_prefetcher(32 * 1024)))
        .build()
        .unwrap();
    Client::with_config(config).unwrap()
}

fn open_options(server: &RangeServer) -> OpenOptions {
    OpenOptions::new(server.url())
        .ip("127.0.0.1")
        .window(Window::Bytes(65536))
}

#[test]
fn reads_and_seeks_over_http3() {
    let _guard = TEST_SERIALIZE.lock().unwrap_or_else(|e| e.into_inner());
    init_tracing();
    let (certs, key) = generate_self_signed();
    let server = RangeServer::start(server_config(certs.clone(), key));
    let client = trusting_client(&certs);

    client.open(open_options(&server), Wait::from_millis(5000)).unwrap();
    assert_eq!(server.ranges().first(), Some(&Some("bytes=0-65535".to_string())));

    let expected = pattern(SIZE);
    let mut reader = client.reader(Wait::Forever);
    let mut head = vec![0u8; 100_000];
    reader.read_exact(&mut head).unwrap();
    assert_eq!(head, &expected[..100_000]);
    assert_eq!(client.seek(0, Whence::Size), Ok(SIZE as u64));

    // Backwards: nothing before the read position is kept.
    assert_eq!(reader.seek(SeekFrom::Start(5_000)).unwrap(), 5_000);
    let mut chunk = vec![0u8; 1_000];
    reader.read_exact(&mut chunk).unwrap();
    assert_eq!(chunk, &expected[5_000..6_000]);

    assert_eq!(reader.seek(SeekFrom::End(-1_000)).unwrap(), (SIZE - 1_000) as u64);
    let mut tail = Vec::new();
    reader.read_to_end(&mut tail).unwrap();
    assert_eq!(tail, &expected[SIZE - 1_000..]);

    let stats = client.get_stats().unwrap();
    assert!(stats.rtt > Duration::ZERO);
    assert!(stats.connect_time >= stats.resolve_time);
    assert!(stats.first_byte_time.is_some());

    client.close();
    assert!(!client.is_busy());
    assert!(server.ranges().len() >= 2);
}

#[test]
fn reopen_after_close() {
    let _guard = TEST_SERIALIZE.lock().unwrap_or_else(|e| e.into_inner());
    init_tracing();
    let (certs, key) = generate_self_signed();
    let server = RangeServer::start(server_config(certs.clone(), key));
    let client = trusting_client(&certs);
    let expected = pattern(SIZE);

    for _ in 0..2 {
        client.open(open_options(&server), Wait::from_millis(5000)).unwrap();
        let mut all = Vec::new();
        client.reader(Wait::Forever).read_to_end(&mut all).unwrap();
        assert_eq!(all, expected);
        client.close();
    }
}

#[test]
fn untrusted_certificate_fails_open() {
    let _guard = TEST_SERIALIZE.lock().unwrap_or_else(|e| e.into_inner());
    init_tracing();
    let (certs, key) = generate_self_signed();
    let server = RangeServer::start(server_config(certs, key));
    let config = ClientConfigBuilder::new()
        .connect_timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    let client = Client::with_config(config).unwrap();

    assert_eq!(
        client.open(open_options(&server), Wait::from_millis(5000)),
        Err(Error::ConnectFail)
    );
    client.close();

    // Same server, identity checks off.
    client
        .open(open_options(&server).verify_identity(false), Wait::from_millis(5000))
        .unwrap();
    let mut head = [0u8; 16];
    client.reader(Wait::Forever).read_exact(&mut head).unwrap();
    assert_eq!(&head[..], &pattern(16)[..]);
}
