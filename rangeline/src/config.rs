use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::prefetch::{PrefetchFactory, block_prefetcher};
use crate::tls::Verification;
use crate::transport::{TransportFactory, h3_transport};

/// Low-latency sufficiency threshold: a reader waiting on a resource of
/// known size is released once this many bytes are buffered.
pub const READ_BLOCK_SIZE: usize = 32 * 1024;

/// Client configuration shared by every session of a [`Client`](crate::Client).
#[derive(Clone)]
pub struct ClientConfig {
    /// Longest the worker waits for network events before checking its
    /// mailbox again. Default: 5ms.
    pub tick: Duration,
    /// Handshake deadline. Default: 10s.
    pub connect_timeout: Duration,
    /// QUIC idle timeout. `None` keeps the connection open indefinitely.
    /// Default: 30s.
    pub idle_timeout: Option<Duration>,
    /// See [`READ_BLOCK_SIZE`].
    pub read_threshold: usize,
    /// Certificate checks for sessions opened with `verify_identity`.
    pub verification: Verification,
    /// Look-ahead scheduler created per resource. `None` issues one
    /// open-ended range per seek instead.
    pub prefetch: Option<PrefetchFactory>,
    pub transport: TransportFactory,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(5),
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Some(Duration::from_secs(30)),
            read_threshold: READ_BLOCK_SIZE,
            verification: Verification::default(),
            prefetch: Some(block_prefetcher(READ_BLOCK_SIZE)),
            transport: h3_transport(),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("tick", &self.tick)
            .field("connect_timeout", &self.connect_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .field("read_threshold", &self.read_threshold)
            .field("verification", &self.verification)
            .field("prefetch", &self.prefetch.is_some())
            .finish_non_exhaustive()
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tick.is_zero() || self.connect_timeout.is_zero() || self.read_threshold == 0 {
            return Err(Error::InvalidParam);
        }
        if self.idle_timeout.is_some_and(|d| d.is_zero()) {
            return Err(Error::InvalidParam);
        }
        Ok(())
    }
}

/// Builder for [`ClientConfig`].
///
/// ```rust,ignore
/// let config = ClientConfigBuilder::new()
///     .connect_timeout(Duration::from_secs(3))
///     .read_threshold(64 * 1024)
///     .build()?;
/// ```
#[derive(Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
    threshold_set: bool,
    prefetch_set: bool,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick(mut self, tick: Duration) -> Self {
        self.config.tick = tick;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Also becomes the default prefetcher's minimum look-ahead.
    pub fn read_threshold(mut self, bytes: usize) -> Self {
        self.config.read_threshold = bytes;
        self.threshold_set = true;
        self
    }

    pub fn verification(mut self, verification: Verification) -> Self {
        self.config.verification = verification;
        self
    }

    pub fn prefetch(mut self, factory: Option<PrefetchFactory>) -> Self {
        self.config.prefetch = factory;
        self.prefetch_set = true;
        self
    }

    pub fn transport(mut self, factory: TransportFactory) -> Self {
        self.config.transport = factory;
        self
    }

    pub fn build(mut self) -> Result<ClientConfig> {
        if self.threshold_set && !self.prefetch_set {
            self.config.prefetch = Some(block_prefetcher(self.config.read_threshold));
        }
        self.config.validate()?;
        Ok(self.config)
    }
}
