//! Sub-stream bookkeeping on the worker: which stream is live, what its
//! response announced, and where its body goes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace, warn};

use crate::metadata;
use crate::metrics;
use crate::prefetch::{InFlight, PrefetchFactory};
use crate::session::HeaderBlock;
use crate::shared::Shared;
use crate::transport::{ResetReason, StreamDelegate, StreamId};

#[derive(Default)]
struct Response {
    /// Span the request asked for.
    span: InFlight,
    status: u16,
    headers: HeaderBlock,
    content_length: Option<u64>,
    received: u64,
    /// Body bytes have been seen; metadata is applied once.
    flowing: bool,
}

impl Response {
    fn accepted(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub(crate) struct StreamTracker {
    shared: Arc<Shared>,
    prefetch: Option<PrefetchFactory>,
    active: Option<StreamId>,
    /// Streams to reset once the transport hands control back.
    retired: Vec<(StreamId, ResetReason)>,
    responses: HashMap<StreamId, Response>,
    /// Span of the request being sent; claimed by the stream it creates.
    next_span: InFlight,
    /// Next body of a new resource creates a prefetcher.
    prefetch_pending: bool,
    block_size: u64,
    hint: Option<u64>,
    first_byte: Option<Instant>,
    /// Offset to continue from after a window ended short of a known end
    /// with no prefetcher to ask for more.
    resume: Option<u64>,
}

impl StreamTracker {
    pub fn new(shared: Arc<Shared>, prefetch: Option<PrefetchFactory>) -> Self {
        Self {
            shared,
            prefetch,
            active: None,
            retired: Vec::new(),
            responses: HashMap::new(),
            next_span: InFlight::default(),
            prefetch_pending: false,
            block_size: 0,
            hint: None,
            first_byte: None,
            resume: None,
        }
    }

    /// A new resource is about to be requested from offset zero.
    pub fn begin_resource(&mut self, block_size: u64, hint: Option<u64>) {
        self.prefetch_pending = true;
        self.block_size = block_size;
        self.hint = hint;
    }

    /// The next request covers `[start, end]`.
    pub fn expect_range(&mut self, start: u64, end: Option<u64>) {
        self.next_span = InFlight::new(start, end);
    }

    /// Stop tracking the active stream; the caller resets it.
    pub fn take_active(&mut self) -> Option<StreamId> {
        let id = self.active.take()?;
        self.responses.remove(&id);
        self.shared.buffer.set_streaming(false);
        Some(id)
    }

    pub fn take_retired(&mut self) -> Vec<(StreamId, ResetReason)> {
        std::mem::take(&mut self.retired)
    }

    pub fn take_resume(&mut self) -> Option<u64> {
        self.resume.take()
    }

    /// Drop every stream; used when the connection they lived on is gone.
    pub fn forget_streams(&mut self) {
        self.active = None;
        self.resume = None;
        self.retired.clear();
        self.responses.clear();
        self.shared.buffer.set_streaming(false);
    }

    pub fn first_byte(&self) -> Option<Instant> {
        self.first_byte
    }

    /// Size discovery and prefetcher creation on a stream's first body bytes.
    fn on_first_data(&mut self, stream: StreamId) {
        let Some(response) = self.responses.get(&stream) else {
            return;
        };
        // An origin ignoring `range` sends the resource from the start.
        let in_flight = if response.status == 200 {
            InFlight::new(0, None)
        } else {
            response.span
        };
        let mut state = self.shared.buffer.lock();
        match metadata::resource_size(&response.headers) {
            Ok(Some(size)) => match state.resource_size {
                None => {
                    debug!(%stream, size, "resource size");
                    state.resource_size = Some(size);
                }
                Some(known) if known != size => {
                    warn!(%stream, known, announced = size, "resource size changed, keeping known size");
                }
                Some(_) => {}
            },
            Ok(None) => {}
            Err(e) => {
                warn!(%stream, error = %e, "inconsistent content-range");
                if state.resource_size.is_none() {
                    state.resource_size = Some(e.first);
                }
            }
        }

        if !self.prefetch_pending {
            return;
        }
        self.prefetch_pending = false;
        if let Some(factory) = &self.prefetch {
            let mut prefetcher = factory(self.shared.range_requester());
            if prefetcher.init(state.resource_size, self.block_size, self.hint, in_flight) {
                state.prefetcher = Some(prefetcher);
            } else {
                trace!(%stream, "prefetcher declined resource");
            }
        }
    }
}

impl StreamDelegate for StreamTracker {
    fn on_stream_created(&mut self, stream: StreamId) {
        if let Some(old) = self.active.replace(stream)
            && old != stream
        {
            self.responses.remove(&old);
            self.retired.push((old, ResetReason::Refused));
        }
        let span = std::mem::take(&mut self.next_span);
        self.responses.insert(
            stream,
            Response {
                span,
                ..Response::default()
            },
        );
        self.shared.buffer.set_streaming(true);
        trace!(%stream, "stream created");
    }

    fn on_response(&mut self, stream: StreamId, status: u16, headers: &HeaderBlock) {
        let Some(response) = self.responses.get_mut(&stream) else {
            return;
        };
        response.status = status;
        response.content_length = metadata::content_length(headers);
        response.headers = headers.clone();
        if response.accepted() {
            debug!(%stream, status, length = ?response.content_length, "response");
        } else {
            warn!(%stream, status, "unexpected response status, body discarded");
        }
    }

    fn on_data(&mut self, stream: StreamId, data: &[u8]) {
        if self.active != Some(stream) {
            trace!(%stream, len = data.len(), "data for inactive stream ignored");
            return;
        }
        let Some(response) = self.responses.get_mut(&stream) else {
            return;
        };
        if !response.accepted() {
            return;
        }

        let mut body = data;
        let mut overrun = false;
        if let Some(limit) = response.content_length {
            let room = limit.saturating_sub(response.received);
            if body.len() as u64 > room {
                warn!(%stream, limit, received = response.received + body.len() as u64, "body exceeds content-length");
                body = &body[..room as usize];
                overrun = true;
            }
        }
        response.received += body.len() as u64;
        let first = !response.flowing;
        response.flowing = true;

        if first {
            self.on_first_data(stream);
            if self.first_byte.is_none() {
                self.first_byte = Some(Instant::now());
            }
        }
        if !body.is_empty() {
            metrics::BYTES_RECEIVED.add(body.len() as u64);
            self.shared.buffer.append(body);
        }
        if overrun && let Some(id) = self.take_active() {
            self.retired.push((id, ResetReason::BadPayload));
        }
    }

    fn on_stream_closed(&mut self, stream: StreamId) {
        let response = self.responses.remove(&stream);
        if self.active != Some(stream) {
            return;
        }
        self.active = None;
        self.shared.buffer.set_streaming(false);
        trace!(%stream, "stream finished");
        let Some(response) = response.filter(|r| r.accepted() && r.received > 0) else {
            return;
        };

        let mut state = self.shared.buffer.lock();
        // A whole-resource body that ran to completion is its own length.
        if response.status == 200 && state.resource_size.is_none() {
            debug!(%stream, size = response.received, "resource size from complete body");
            state.resource_size = Some(response.received);
            drop(state);
            self.shared.buffer.notify();
            return;
        }
        if state.prefetcher.is_none()
            && let Some(size) = state.resource_size
        {
            let end = state.read_offset + state.buffered();
            if end < size {
                self.resume = Some(end);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::Wait;
    use std::sync::atomic::AtomicBool;

    fn tracker() -> StreamTracker {
        StreamTracker::new(Arc::new(Shared::new(1, 4)), None)
    }

    fn head(fields: &[(&str, &str)]) -> HeaderBlock {
        fields.iter().copied().collect()
    }

    #[test]
    fn replacing_a_stream_retires_the_old_one() {
        let mut t = tracker();
        t.on_stream_created(StreamId(0));
        t.on_stream_created(StreamId(4));
        assert_eq!(t.active, Some(StreamId(4)));
        assert_eq!(t.take_retired(), vec![(StreamId(0), ResetReason::Refused)]);
    }

    #[test]
    fn body_lands_in_buffer_with_size() {
        let mut t = tracker();
        t.on_stream_created(StreamId(0));
        t.on_response(
            StreamId(0),
            206,
            &head(&[("content-range", "bytes 0-4/1000"), ("content-length", "5")]),
        );
        t.on_data(StreamId(0), b"hello");
        let state = t.shared.buffer.lock();
        assert_eq!(state.resource_size, Some(1000));
        assert_eq!(&state.bytes[..], b"hello");
        drop(state);
        assert!(t.first_byte().is_some());
    }

    #[test]
    fn inactive_and_rejected_bodies_are_dropped() {
        let mut t = tracker();
        t.on_stream_created(StreamId(0));
        t.on_response(StreamId(0), 404, &HeaderBlock::new());
        t.on_data(StreamId(0), b"not found");
        t.on_data(StreamId(8), b"stray");
        assert!(t.shared.buffer.lock().bytes.is_empty());
        assert!(t.first_byte().is_none());
    }

    #[test]
    fn overrun_is_truncated_and_reset() {
        let mut t = tracker();
        t.on_stream_created(StreamId(0));
        t.on_response(StreamId(0), 200, &head(&[("content-length", "4")]));
        t.on_data(StreamId(0), b"abcdef");
        assert_eq!(&t.shared.buffer.lock().bytes[..], b"abcd");
        assert_eq!(t.active, None);
        assert_eq!(t.take_retired(), vec![(StreamId(0), ResetReason::BadPayload)]);
    }

    #[test]
    fn known_size_is_never_replaced() {
        let mut t = tracker();
        t.on_stream_created(StreamId(0));
        t.on_response(StreamId(0), 206, &head(&[("content-range", "bytes 0-0/1000")]));
        t.on_data(StreamId(0), b"a");
        t.on_stream_created(StreamId(4));
        t.on_response(StreamId(4), 206, &head(&[("content-range", "bytes 1-1/2000")]));
        t.on_data(StreamId(4), b"b");
        assert_eq!(t.shared.buffer.lock().resource_size, Some(1000));
    }

    #[test]
    fn closing_active_stream_releases_reader() {
        let mut t = tracker();
        t.on_stream_created(StreamId(0));
        t.on_response(StreamId(0), 206, &head(&[("content-range", "bytes 0-1/100000")]));
        t.on_data(StreamId(0), b"ab");
        t.on_stream_closed(StreamId(0));
        assert_eq!(t.active, None);

        // Below the threshold, but nothing more is coming.
        let running = AtomicBool::new(true);
        let mut dst = [0u8; 8];
        assert_eq!(t.shared.buffer.read(&mut dst, Wait::Forever, &running), Ok(2));
    }

    #[test]
    fn short_window_without_prefetcher_resumes() {
        let mut t = tracker();
        t.on_stream_created(StreamId(0));
        t.on_response(StreamId(0), 206, &head(&[("content-range", "bytes 0-3/10")]));
        t.on_data(StreamId(0), b"abcd");
        t.on_stream_closed(StreamId(0));
        assert_eq!(t.take_resume(), Some(4));
        assert_eq!(t.take_resume(), None);

        // A complete resource needs nothing more.
        let mut t = tracker();
        t.on_stream_created(StreamId(0));
        t.on_response(StreamId(0), 200, &head(&[("content-length", "4")]));
        t.on_data(StreamId(0), b"abcd");
        t.on_stream_closed(StreamId(0));
        assert_eq!(t.take_resume(), None);
    }

    #[test]
    fn unsized_complete_body_sets_size() {
        let mut t = tracker();
        t.on_stream_created(StreamId(0));
        t.on_response(StreamId(0), 200, &HeaderBlock::new());
        t.on_data(StreamId(0), b"abc");
        assert_eq!(t.shared.buffer.lock().resource_size, None);
        t.on_stream_closed(StreamId(0));
        assert_eq!(t.shared.buffer.lock().resource_size, Some(3));
    }

    #[test]
    fn prefetcher_created_once_per_resource() {
        let created = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = created.clone();
        let factory: PrefetchFactory = Arc::new(move |requester| {
            counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            Box::new(crate::prefetch::BlockPrefetcher::new(requester, 4))
        });
        let mut t = StreamTracker::new(Arc::new(Shared::new(1, 4)), Some(factory));
        t.begin_resource(64 * 1024, None);
        t.on_stream_created(StreamId(0));
        t.on_response(StreamId(0), 206, &head(&[("content-range", "bytes 0-65535/1000000")]));
        t.on_data(StreamId(0), b"x");
        t.on_data(StreamId(0), b"y");
        assert!(t.shared.buffer.lock().prefetcher.is_some());

        t.on_stream_created(StreamId(4));
        t.on_response(StreamId(4), 206, &head(&[("content-range", "bytes 9-9/1000000")]));
        t.on_data(StreamId(4), b"z");
        assert_eq!(created.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[test]
    fn prefetcher_starts_from_the_stream_in_flight() {
        let asked = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = asked.clone();
        let factory: PrefetchFactory = Arc::new(move |_| {
            let sink = sink.clone();
            Box::new(crate::prefetch::BlockPrefetcher::new(
                crate::prefetch::RangeRequester::new(move |start, end| {
                    sink.lock().unwrap().push((start, end));
                    true
                }),
                4,
            ))
        });
        let mut t = StreamTracker::new(Arc::new(Shared::new(1, 4)), Some(factory));
        t.begin_resource(64 * 1024, None);

        // First window never answered, then replaced by an open-ended seek.
        t.expect_range(0, Some(65535));
        t.on_stream_created(StreamId(0));
        t.take_active();
        t.shared.buffer.lock().read_offset = 200_000;
        t.expect_range(200_000, None);
        t.on_stream_created(StreamId(4));
        t.on_response(
            StreamId(4),
            206,
            &head(&[("content-range", "bytes 200000-399999/400000")]),
        );
        t.on_data(StreamId(4), &[0u8; 70_000]);
        assert!(t.shared.buffer.lock().prefetcher.is_some());

        let running = AtomicBool::new(true);
        let mut dst = vec![0u8; 70_000];
        assert_eq!(t.shared.buffer.read(&mut dst, Wait::NoWait, &running), Ok(70_000));
        assert!(asked.lock().unwrap().is_empty());
    }
}
