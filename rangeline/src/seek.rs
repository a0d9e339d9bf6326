//! Seeking: serve from the buffer when possible, otherwise restart the
//! network at the target.

use std::sync::atomic::Ordering;

use bytes::Buf;
use tracing::debug;

use crate::error::{Error, Result};
use crate::metrics;
use crate::transport::ResetReason;
use crate::worker::Worker;

/// Reference point of a seek offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// From the start of the resource.
    Set,
    /// From the current read position.
    Current,
    /// From the end of the resource. Needs a known size.
    End,
    /// No movement; returns the resource size.
    Size,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolved {
    /// Answer without touching any state.
    Stay(u64),
    /// Move the read position here.
    Move(u64),
}

pub(crate) fn resolve_target(
    offset: i64,
    whence: Whence,
    read_offset: u64,
    size: Option<u64>,
) -> Result<Resolved> {
    let base = match whence {
        Whence::Size => return size.map(Resolved::Stay).ok_or(Error::NotSupported),
        Whence::Current if offset == 0 => return Ok(Resolved::Stay(read_offset)),
        Whence::Set if u64::try_from(offset) == Ok(read_offset) => {
            return Ok(Resolved::Stay(read_offset));
        }
        Whence::Set => 0,
        Whence::Current => read_offset,
        Whence::End => size.ok_or(Error::NotSupported)?,
    };
    let target = i128::from(base) + i128::from(offset);
    u64::try_from(target)
        .map(Resolved::Move)
        .map_err(|_| Error::InvalidParam)
}

impl Worker {
    pub(crate) fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        let target = {
            let mut state = self.shared.buffer.lock();
            let target = match resolve_target(offset, whence, state.read_offset, state.resource_size)? {
                Resolved::Stay(value) => return Ok(value),
                Resolved::Move(target) => target,
            };

            let skip = target.saturating_sub(state.read_offset);
            if target > state.read_offset && state.buffered() > skip {
                state.bytes.advance(skip as usize);
                state.read_offset = target;
                if let Some(p) = state.prefetcher.as_mut() {
                    p.seek(target);
                }
                metrics::SEEK_HITS.increment();
                debug!(target, skipped = skip, "seek hit");
                return Ok(target);
            }
            target
        };

        metrics::SEEK_MISSES.increment();
        self.cancel_active(ResetReason::Cancelled);

        let past_end;
        {
            let mut state = self.shared.buffer.lock();
            self.shared.epoch.fetch_add(1, Ordering::AcqRel);
            state.bytes.clear();
            state.read_offset = target;
            past_end = state.resource_size.is_some_and(|size| target >= size);
            if let Some(p) = state.prefetcher.as_mut() {
                p.seek(target);
                debug!(target, "seek miss, prefetcher restarted");
                return Ok(target);
            }
        }

        if past_end {
            debug!(target, "seek past end");
            return Ok(target);
        }
        debug!(target, "seek miss");
        self.request_range(target, None)?;
        Ok(target)
    }
}
