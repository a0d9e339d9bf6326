use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info_span};

use crate::bridge::{Wait, oneshot};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::seek::Whence;
use crate::session::{OpenOptions, Request};
use crate::shared::Shared;
use crate::stats::Stats;
use crate::worker::Worker;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Blocking, seekable reader of one HTTP/3 resource.
///
/// `open` starts a worker thread that owns the connection; every other
/// operation is either posted to that worker or served from the buffer it
/// fills. All methods take `&self`, so one thread can read while another
/// seeks or closes.
///
/// ```rust,ignore
/// let client = Client::new();
/// client.open(OpenOptions::new("https://cdn.example.com/a.mp4"), Wait::from_millis(5000))?;
/// let mut buf = [0u8; 4096];
/// let n = client.read_buffer(&mut buf, Wait::Forever)?;
/// let size = client.seek(0, Whence::Size)?;
/// client.close();
/// ```
pub struct Client {
    shared: Arc<Shared>,
    config: ClientConfig,
    /// Held while a worker is spawned or joined, so `open` and `close`
    /// never interleave.
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    pub fn new() -> Self {
        Self::build(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: ClientConfig) -> Self {
        let handle = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
        Self {
            shared: Arc::new(Shared::new(handle, config.read_threshold)),
            config,
            thread: Mutex::new(None),
        }
    }

    /// Process-unique identifier, carried by this client's log events.
    pub fn handle(&self) -> u64 {
        self.shared.handle
    }

    /// Between `open` and `close`.
    pub fn is_busy(&self) -> bool {
        self.shared.busy.load(Ordering::Acquire)
    }

    /// The worker is up and serving requests.
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Connect and request the first window of `options.url`.
    ///
    /// With [`Wait::NoWait`] this returns once the worker is spawned and the
    /// outcome is only visible through later calls. A `Timeout` leaves the
    /// setup running. Any failure still needs a `close` before the next
    /// `open`.
    pub fn open(&self, options: OpenOptions, wait: Wait) -> Result<()> {
        if options.url.is_empty() {
            return Err(Error::InvalidParam);
        }
        let mut thread = self.thread.lock().unwrap_or_else(|e| e.into_inner());
        if self.shared.busy.swap(true, Ordering::AcqRel) {
            return Err(Error::InvalidState);
        }

        self.shared.started.reset();
        let (tx, rx) = crossbeam_channel::unbounded();
        *self.shared.mailbox.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        let (reply, pending) = oneshot();

        let worker = Worker::new(self.shared.clone(), self.config.clone());
        let handle = self.shared.handle;
        let spawned = thread::Builder::new()
            .name(format!("rangeline-{handle}"))
            .spawn(move || {
                let span = info_span!("rangeline", handle);
                let _enter = span.enter();
                worker.run(rx, options, reply);
            });
        match spawned {
            Ok(handle) => *thread = Some(handle),
            Err(e) => {
                error!(handle, error = %e, "failed to spawn worker");
                self.shared.mailbox.lock().unwrap_or_else(|e| e.into_inner()).take();
                self.shared.busy.store(false, Ordering::Release);
                return Err(Error::FatalError);
            }
        }
        drop(thread);

        match wait {
            Wait::NoWait => Ok(()),
            wait => pending.wait(wait)?,
        }
    }

    /// Switch to another resource on the same connection.
    pub fn request(&self, request: Request, wait: Wait) -> Result<()> {
        if request.url.is_empty() {
            return Err(Error::InvalidParam);
        }
        self.shared.call(wait, move |worker| worker.request(request))
    }

    /// Stop the worker and return to the idle state. No-op when not open.
    pub fn close(&self) {
        if !self.is_busy() {
            return;
        }
        let mut thread = self.thread.lock().unwrap_or_else(|e| e.into_inner());
        // Another close got here first.
        if !self.is_busy() {
            return;
        }
        self.shared.started.wait();
        self.shared.stop();
        if let Some(handle) = thread.take()
            && handle.join().is_err()
        {
            error!(handle = self.shared.handle, "worker panicked");
        }
        self.shared.started.reset();
        self.shared.busy.store(false, Ordering::Release);
        debug!(handle = self.shared.handle, "closed");
    }

    /// Copy buffered bytes into `dst`, waiting per `wait` for enough to
    /// arrive. Returns the count copied, possibly zero; `Eof` once the read
    /// position reaches a known end.
    pub fn read_buffer(&self, dst: &mut [u8], wait: Wait) -> Result<usize> {
        if !self.is_running() {
            return Err(Error::InvalidState);
        }
        if dst.is_empty() {
            return Err(Error::InvalidParam);
        }
        self.shared.buffer.read(dst, wait, &self.shared.running)
    }

    /// Move the read position; returns the new position, or the resource
    /// size for [`Whence::Size`].
    pub fn seek(&self, offset: i64, whence: Whence) -> Result<u64> {
        self.shared
            .call(Wait::Forever, move |worker| worker.seek(offset, whence))
    }

    pub fn get_stats(&self) -> Result<Stats> {
        self.shared.call(Wait::Forever, |worker| worker.stats())
    }

    /// `std::io` view of this client; reads wait per `wait`.
    pub fn reader(&self, wait: Wait) -> Reader<'_> {
        Reader { client: self, wait }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

/// [`io::Read`] + [`io::Seek`] adapter returned by [`Client::reader`].
pub struct Reader<'a> {
    client: &'a Client,
    wait: Wait,
}

impl io::Read for Reader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.client.read_buffer(buf, self.wait) {
            Err(Error::Eof) => Ok(0),
            other => other.map_err(io::Error::from),
        }
    }
}

impl io::Seek for Reader<'_> {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let (offset, whence) = match pos {
            io::SeekFrom::Start(n) => (
                i64::try_from(n).map_err(|_| io::Error::from(Error::InvalidParam))?,
                Whence::Set,
            ),
            io::SeekFrom::Current(d) => (d, Whence::Current),
            io::SeekFrom::End(d) => (d, Whence::End),
        };
        self.client.seek(offset, whence).map_err(io::Error::from)
    }
}
