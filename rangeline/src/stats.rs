use std::time::Duration;

use crate::error::{Error, Result};
use crate::worker::Worker;

/// Snapshot returned by [`Client::get_stats`](crate::Client::get_stats).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub packets_lost: u64,
    pub packets_reordered: u64,
    /// Smoothed round-trip time.
    pub rtt: Duration,
    /// Estimated bandwidth in bits per second.
    pub bandwidth: u64,
    /// Open to host resolved.
    pub resolve_time: Duration,
    /// Open to handshake complete.
    pub connect_time: Duration,
    /// Open to the first body byte; `None` until data has arrived.
    pub first_byte_time: Option<Duration>,
}

impl Worker {
    pub(crate) fn stats(&self) -> Result<Stats> {
        let session = self.session.as_ref().ok_or(Error::NullPointer)?;
        let transport = self.transport.as_ref().ok_or(Error::NullPointer)?;
        let path = transport.stats()?;
        let marks = session.marks;
        let since_start = |at: Option<std::time::Instant>| at.map(|t| t.saturating_duration_since(marks.start));

        Ok(Stats {
            packets_lost: path.packets_lost,
            packets_reordered: path.packets_reordered,
            rtt: path.rtt,
            bandwidth: path.bandwidth,
            resolve_time: since_start(marks.resolved).unwrap_or_default(),
            connect_time: since_start(marks.connected).unwrap_or_default(),
            first_byte_time: since_start(self.tracker.first_byte()),
        })
    }
}
