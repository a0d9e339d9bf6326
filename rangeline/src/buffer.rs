//! The byte buffer shared by the worker (producer) and the reading thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Instant;

use bytes::{Buf, BytesMut};
use tracing::trace;

use crate::bridge::Wait;
use crate::error::{Error, Result};
use crate::metrics;
use crate::prefetch::Prefetcher;

/// Buffered bytes plus the offsets they are measured against.
///
/// `bytes` holds the resource span `[read_offset, read_offset + bytes.len())`.
pub(crate) struct BufferState {
    pub bytes: BytesMut,
    pub read_offset: u64,
    /// Fixed once discovered; only a request for a new resource clears it.
    pub resource_size: Option<u64>,
    pub prefetcher: Option<Box<dyn Prefetcher>>,
    /// A sub-stream is currently delivering into the buffer.
    pub streaming: bool,
}

impl BufferState {
    fn new() -> Self {
        Self {
            bytes: BytesMut::new(),
            read_offset: 0,
            resource_size: None,
            prefetcher: None,
            streaming: false,
        }
    }

    pub fn buffered(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Whether a waiting reader should be released.
    ///
    /// With an unknown size any data will do. With a known size the buffer
    /// must hold the rest of the resource or at least `threshold` bytes. Once
    /// no sub-stream is active, whatever is buffered is all that is coming.
    pub fn is_sufficient(&self, threshold: u64) -> bool {
        let buffered = self.buffered();
        if buffered == 0 {
            return false;
        }
        if !self.streaming {
            return true;
        }
        match self.resource_size {
            None => true,
            Some(size) => {
                buffered >= size.saturating_sub(self.read_offset) || buffered >= threshold
            }
        }
    }

    pub fn at_eof(&self) -> bool {
        self.resource_size
            .is_some_and(|size| self.read_offset >= size)
    }
}

pub(crate) struct StreamBuffer {
    state: Mutex<BufferState>,
    data: Condvar,
    threshold: u64,
}

impl StreamBuffer {
    pub fn new(threshold: usize) -> Self {
        Self {
            state: Mutex::new(BufferState::new()),
            data: Condvar::new(),
            threshold: threshold as u64,
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wake every blocked reader.
    pub fn notify(&self) {
        self.data.notify_all();
    }

    /// Copy up to `dst.len()` bytes out to the reader, waiting per `wait`
    /// for the buffer to become sufficient first. A wait that ends without
    /// enough data still returns what is there, possibly nothing.
    pub fn read(&self, dst: &mut [u8], wait: Wait, running: &AtomicBool) -> Result<usize> {
        let mut state = self.lock();
        if state.at_eof() {
            return Err(Error::Eof);
        }

        let ready = |s: &BufferState| !running.load(Ordering::Acquire) || s.is_sufficient(self.threshold);
        match wait {
            Wait::NoWait => {}
            Wait::Forever => {
                while !ready(&*state) {
                    state = self.data.wait(state).unwrap_or_else(|e| e.into_inner());
                }
            }
            Wait::Deadline(d) => {
                let deadline = Instant::now() + d;
                while !ready(&*state) {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    state = self
                        .data
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(|e| e.into_inner())
                        .0;
                }
            }
        }

        let n = dst.len().min(state.bytes.len());
        if n == 0 {
            return Ok(0);
        }
        dst[..n].copy_from_slice(&state.bytes[..n]);
        state.bytes.advance(n);
        state.read_offset += n as u64;
        if let Some(p) = state.prefetcher.as_mut() {
            p.consume(n as u64);
        }
        metrics::BYTES_DELIVERED.add(n as u64);
        trace!(n, offset = state.read_offset, "read");
        Ok(n)
    }

    /// Append sub-stream data and wake readers once the buffer is sufficient.
    pub fn append(&self, data: &[u8]) {
        let mut state = self.lock();
        state.bytes.extend_from_slice(data);
        if let Some(p) = state.prefetcher.as_mut() {
            p.produce(data.len() as u64);
        }
        if state.is_sufficient(self.threshold) {
            self.data.notify_all();
        }
    }

    pub fn set_streaming(&self, streaming: bool) {
        let mut state = self.lock();
        state.streaming = streaming;
        if !streaming {
            self.data.notify_all();
        }
    }

    /// Return to the state of a fresh resource.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.bytes.clear();
        state.read_offset = 0;
        state.resource_size = None;
        state.prefetcher = None;
        state.streaming = false;
    }
}
