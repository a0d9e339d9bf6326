//! Look-ahead scheduling of range requests.
//!
//! A [`Prefetcher`] is told how many bytes arrive and how many the reader
//! takes, and asks for the next window through a [`RangeRequester`]. The
//! client creates one per resource, on the first data of a `request`, from
//! the [`PrefetchFactory`] in its config.

use std::fmt;
use std::sync::Arc;

use tracing::trace;

/// Prefetch manager contract.
///
/// All offsets are absolute positions in the resource. Calls come from both
/// the worker (`produce`, `seek`) and the reading thread (`consume`), always
/// under the client's buffer lock.
pub trait Prefetcher: Send {
    /// Prepare for a resource. `in_flight` is the span of the sub-stream
    /// whose first bytes are arriving, which need not start at zero.
    /// Returning `false` discards the prefetcher and the client falls back
    /// to open-ended range requests.
    fn init(
        &mut self,
        resource_size: Option<u64>,
        block_size: u64,
        hint: Option<u64>,
        in_flight: InFlight,
    ) -> bool;
    /// `n` bytes were appended to the buffer.
    fn produce(&mut self, n: u64);
    /// The reader took `n` bytes out of the buffer.
    fn consume(&mut self, n: u64);
    /// The read position moved to `offset`.
    fn seek(&mut self, offset: u64);
}

/// Span `[start, end]` (inclusive) already requested when a prefetcher is
/// created. An absent end runs to the end of the resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InFlight {
    pub start: u64,
    pub end: Option<u64>,
}

impl InFlight {
    pub fn new(start: u64, end: Option<u64>) -> Self {
        Self { start, end }
    }
}

/// Handle through which a prefetcher asks for `[start, end]` (inclusive; an
/// absent end means "to the end of the resource").
///
/// Requests are queued to the client's worker and return `false` when the
/// client is gone or stopped.
#[derive(Clone)]
pub struct RangeRequester(Arc<dyn Fn(u64, Option<u64>) -> bool + Send + Sync>);

impl RangeRequester {
    pub fn new(f: impl Fn(u64, Option<u64>) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn request(&self, start: u64, end: Option<u64>) -> bool {
        (self.0)(start, end)
    }
}

impl fmt::Debug for RangeRequester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RangeRequester")
    }
}

pub type PrefetchFactory = Arc<dyn Fn(RangeRequester) -> Box<dyn Prefetcher> + Send + Sync>;

/// Factory for [`BlockPrefetcher`]s with the given read threshold as the
/// minimum look-ahead.
pub fn block_prefetcher(read_threshold: usize) -> PrefetchFactory {
    Arc::new(move |requester| Box::new(BlockPrefetcher::new(requester, read_threshold as u64)))
}

/// Fetches the resource one fixed-size window at a time.
///
/// The next window is requested once the current one has fully arrived and
/// the unread look-ahead has dropped below `max(hint, read_threshold)`.
/// Waiting for the whole window matters: a new request replaces the
/// client's active stream, which would cut the current window short.
pub struct BlockPrefetcher {
    requester: RangeRequester,
    read_threshold: u64,
    size: u64,
    block: u64,
    consumed: u64,
    produced: u64,
    /// Exclusive end of everything requested so far.
    requested_end: u64,
    low_water: u64,
}

impl BlockPrefetcher {
    pub fn new(requester: RangeRequester, read_threshold: u64) -> Self {
        Self {
            requester,
            read_threshold,
            size: 0,
            block: 0,
            consumed: 0,
            produced: 0,
            requested_end: 0,
            low_water: read_threshold,
        }
    }

    fn maybe_request(&mut self) {
        if self.produced < self.requested_end || self.requested_end >= self.size {
            return;
        }
        if self.produced.saturating_sub(self.consumed) >= self.low_water {
            return;
        }
        self.request_from(self.requested_end);
    }

    fn request_from(&mut self, start: u64) {
        if start >= self.size {
            return;
        }
        let end = start.saturating_add(self.block).min(self.size) - 1;
        self.requested_end = end + 1;
        let queued = self.requester.request(start, Some(end));
        trace!(start, end, queued, "prefetch window");
    }
}

impl Prefetcher for BlockPrefetcher {
    fn init(
        &mut self,
        resource_size: Option<u64>,
        block_size: u64,
        hint: Option<u64>,
        in_flight: InFlight,
    ) -> bool {
        let Some(size) = resource_size else {
            return false;
        };
        if block_size == 0 || size <= block_size {
            return false;
        }
        self.size = size;
        self.block = block_size;
        self.consumed = in_flight.start;
        self.produced = in_flight.start;
        // An open-ended stream already covers the rest.
        self.requested_end = in_flight.end.map_or(size, |end| end.saturating_add(1).min(size));
        self.low_water = hint.unwrap_or(0).max(self.read_threshold);
        true
    }

    fn produce(&mut self, n: u64) {
        self.produced += n;
        self.maybe_request();
    }

    fn consume(&mut self, n: u64) {
        self.consumed += n;
        self.maybe_request();
    }

    fn seek(&mut self, offset: u64) {
        if offset >= self.consumed && offset < self.produced {
            self.consumed = offset;
            self.maybe_request();
            return;
        }
        self.consumed = offset;
        self.produced = offset;
        self.requested_end = offset;
        self.request_from(offset);
    }
}
