//! In-memory transport for driving a `Client` without a network.
//!
//! `MockTransport` serves byte ranges of resources registered by path, the
//! way an origin answering `range` requests would, and records everything
//! the client asks of it.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rangeline::transport::{
    ResetReason, StreamDelegate, StreamId, Transport, TransportFactory, TransportParams,
    TransportStats,
};
use rangeline::{ClientConfig, ClientConfigBuilder, HeaderBlock, PrefetchFactory, TransportError};

/// Body chunk size the mock delivers per `on_data`.
const CHUNK: usize = 16 * 1024;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Byte `i` of every generated resource.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// How the mock answers a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Answer ranges with 206, everything else with 200.
    Serve,
    /// Ignore `range` and always send the whole resource with 200.
    NoRanges,
    /// Open the stream and never answer.
    Hold,
}

enum Event {
    Response(StreamId, u16, HeaderBlock),
    Data(StreamId, Vec<u8>),
    Closed(StreamId),
}

impl Event {
    fn stream(&self) -> StreamId {
        match self {
            Event::Response(id, ..) | Event::Data(id, _) | Event::Closed(id) => *id,
        }
    }
}

pub struct Script {
    pub mode: Mode,
    pub resources: HashMap<String, Vec<u8>>,
    /// Requests as sent, in order.
    pub sent: Vec<HeaderBlock>,
    pub bodies: Vec<Vec<u8>>,
    pub resets: Vec<(StreamId, ResetReason)>,
    pub params: Vec<TransportParams>,
    pub initializes: usize,
    pub connects: usize,
    pub connected: bool,
    pub fail_connect: bool,
    /// How long `connect` takes.
    pub connect_delay: Duration,
    /// Transports built and not yet dropped.
    pub live: usize,
    next_stream: u64,
    queue: VecDeque<Event>,
}

impl Script {
    /// `range` values of every request sent so far; `"none"` when absent.
    pub fn ranges(&self) -> Vec<String> {
        self.sent
            .iter()
            .map(|h| h.get("range").unwrap_or("none").to_owned())
            .collect()
    }

    fn answer(&mut self, stream: StreamId, headers: &HeaderBlock) {
        if self.mode == Mode::Hold {
            return;
        }
        let path = headers.get(":path").unwrap_or("/");
        let Some(data) = self.resources.get(path).cloned() else {
            self.queue.push_back(Event::Response(stream, 404, HeaderBlock::new()));
            self.queue.push_back(Event::Data(stream, b"not found".to_vec()));
            self.queue.push_back(Event::Closed(stream));
            return;
        };

        let total = data.len() as u64;
        let range = match self.mode {
            Mode::Serve => headers.get("range").and_then(parse_range),
            _ => None,
        };
        let (status, body, fields) = match range {
            Some((start, _)) if start >= total => {
                let fields = vec![("content-range".to_owned(), format!("bytes */{total}"))];
                (416, Vec::new(), fields)
            }
            Some((start, end)) => {
                let last = end.unwrap_or(total - 1).min(total - 1);
                let body = data[start as usize..=last as usize].to_vec();
                let fields = vec![
                    ("content-range".to_owned(), format!("bytes {start}-{last}/{total}")),
                    ("content-length".to_owned(), body.len().to_string()),
                ];
                (206, body, fields)
            }
            None => {
                let fields = vec![("content-length".to_owned(), total.to_string())];
                (200, data, fields)
            }
        };

        self.queue
            .push_back(Event::Response(stream, status, fields.into_iter().collect()));
        for chunk in body.chunks(CHUNK) {
            self.queue.push_back(Event::Data(stream, chunk.to_vec()));
        }
        self.queue.push_back(Event::Closed(stream));
    }
}

fn parse_range(value: &str) -> Option<(u64, Option<u64>)> {
    let bounds = value.strip_prefix("bytes=")?;
    let (start, end) = bounds.split_once('-')?;
    let start = start.parse().ok()?;
    let end = if end.is_empty() { None } else { Some(end.parse().ok()?) };
    Some((start, end))
}

/// Handle on the mock shared by every transport its factory builds.
#[derive(Clone)]
pub struct Mock(Arc<Mutex<Script>>);

impl Mock {
    pub fn new(mode: Mode) -> Self {
        Self(Arc::new(Mutex::new(Script {
            mode,
            resources: HashMap::new(),
            sent: Vec::new(),
            bodies: Vec::new(),
            resets: Vec::new(),
            params: Vec::new(),
            initializes: 0,
            connects: 0,
            connected: false,
            fail_connect: false,
            connect_delay: Duration::ZERO,
            live: 0,
            next_stream: 0,
            queue: VecDeque::new(),
        })))
    }

    pub fn with_resource(self, path: &str, data: Vec<u8>) -> Self {
        self.script().resources.insert(path.to_owned(), data);
        self
    }

    pub fn script(&self) -> MutexGuard<'_, Script> {
        self.0.lock().unwrap()
    }

    pub fn factory(&self) -> TransportFactory {
        let script = self.0.clone();
        Arc::new(move |params| {
            let mut guard = script.lock().unwrap();
            guard.params.push(params);
            guard.live += 1;
            drop(guard);
            Box::new(MockTransport {
                script: script.clone(),
            })
        })
    }

    /// Client config on this mock with the given prefetcher.
    pub fn config(&self, prefetch: Option<PrefetchFactory>) -> ClientConfig {
        ClientConfigBuilder::new()
            .tick(Duration::from_millis(1))
            .prefetch(prefetch)
            .transport(self.factory())
            .build()
            .unwrap()
    }

    /// Poll until `f` holds for the script, failing the test after a second.
    pub fn wait_for(&self, what: &str, f: impl Fn(&Script) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(1);
        while !f(&self.script()) {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

pub struct MockTransport {
    script: Arc<Mutex<Script>>,
}

impl Transport for MockTransport {
    fn initialize(&mut self) -> Result<(), TransportError> {
        let mut script = self.script.lock().unwrap();
        script.initializes += 1;
        script.queue.clear();
        Ok(())
    }

    fn connect(&mut self) -> Result<(), TransportError> {
        let delay = self.script.lock().unwrap().connect_delay;
        std::thread::sleep(delay);
        let mut script = self.script.lock().unwrap();
        script.connects += 1;
        if script.fail_connect {
            return Err(TransportError::Connect("refused".into()));
        }
        script.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.script.lock().unwrap().connected
    }

    fn disconnect(&mut self) {
        let mut script = self.script.lock().unwrap();
        script.connected = false;
        script.queue.clear();
    }

    fn send_request(
        &mut self,
        headers: &HeaderBlock,
        body: &[u8],
        _fin: bool,
        delegate: &mut dyn StreamDelegate,
    ) -> Result<StreamId, TransportError> {
        let stream = {
            let mut script = self.script.lock().unwrap();
            if !script.connected {
                return Err(TransportError::NotConnected);
            }
            let stream = StreamId(script.next_stream);
            script.next_stream += 4;
            script.sent.push(headers.clone());
            script.bodies.push(body.to_vec());
            script.answer(stream, headers);
            stream
        };
        delegate.on_stream_created(stream);
        Ok(stream)
    }

    fn reset_stream(&mut self, stream: StreamId, reason: ResetReason) {
        let mut script = self.script.lock().unwrap();
        script.resets.push((stream, reason));
        script.queue.retain(|e| e.stream() != stream);
    }

    fn stats(&self) -> Result<TransportStats, TransportError> {
        if !self.script.lock().unwrap().connected {
            return Err(TransportError::NotConnected);
        }
        Ok(TransportStats {
            packets_lost: 3,
            packets_reordered: 1,
            rtt: Duration::from_millis(20),
            bandwidth: 8_000_000,
        })
    }

    fn drive(&mut self, max_wait: Duration, delegate: &mut dyn StreamDelegate) {
        let events: Vec<Event> = self.script.lock().unwrap().queue.drain(..).collect();
        if events.is_empty() {
            std::thread::sleep(max_wait);
            return;
        }
        for event in events {
            match event {
                Event::Response(id, status, headers) => delegate.on_response(id, status, &headers),
                Event::Data(id, data) => delegate.on_data(id, &data),
                Event::Closed(id) => delegate.on_stream_closed(id),
            }
        }
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        if let Ok(mut script) = self.script.lock() {
            script.live -= 1;
        }
    }
}

pub fn localhost(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}
