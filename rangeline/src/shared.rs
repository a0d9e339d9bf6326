//! State shared between a [`Client`](crate::Client) and its worker thread.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};

use crossbeam_channel::Sender;
use tracing::trace;

use crate::bridge::{Command, Task, Wait, oneshot};
use crate::buffer::StreamBuffer;
use crate::error::{Error, Result};
use crate::prefetch::RangeRequester;
use crate::worker::Worker;

pub(crate) struct Shared {
    pub handle: u64,
    /// An open/close cycle is in progress.
    pub busy: AtomicBool,
    /// The worker is alive and processing its mailbox.
    pub running: AtomicBool,
    /// Set once the worker thread has started.
    pub started: Latch,
    pub mailbox: Mutex<Option<Sender<Command>>>,
    pub buffer: StreamBuffer,
    /// Bumped whenever outstanding prefetch requests become meaningless:
    /// a seek miss or a resource switch.
    pub epoch: AtomicU64,
}

impl Shared {
    pub fn new(handle: u64, read_threshold: usize) -> Self {
        Self {
            handle,
            busy: AtomicBool::new(false),
            running: AtomicBool::new(false),
            started: Latch::new(),
            mailbox: Mutex::new(None),
            buffer: StreamBuffer::new(read_threshold),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Queue `task` for the worker without waiting for it.
    pub fn post(&self, task: Task) -> Result<()> {
        if !self.is_running() {
            return Err(Error::InvalidState);
        }
        let mailbox = self.mailbox.lock().unwrap_or_else(|e| e.into_inner());
        let tx = mailbox.as_ref().ok_or(Error::NullPointer)?;
        tx.send(Command::Run(task)).map_err(|_| Error::InvalidState)
    }

    /// Run `f` on the worker and wait for its result under `wait`.
    pub fn call<T, F>(&self, wait: Wait, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Worker) -> Result<T> + Send + 'static,
    {
        let (reply, pending) = oneshot();
        self.post(Box::new(move |worker: &mut Worker| reply.send(f(worker))))?;
        pending.wait(wait)?
    }

    /// Ask the worker to leave its loop.
    pub fn stop(&self) {
        let mailbox = self.mailbox.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = mailbox.as_ref() {
            let _ = tx.send(Command::Stop);
        }
    }

    /// Requester for a prefetcher of the current resource.
    ///
    /// Each request is stamped with the epoch current when it is made; the
    /// worker drops it if the epoch has moved on by the time it runs.
    pub fn range_requester(self: &Arc<Self>) -> RangeRequester {
        let weak: Weak<Self> = Arc::downgrade(self);
        RangeRequester::new(move |start, end| {
            let Some(shared) = weak.upgrade() else {
                return false;
            };
            let epoch = shared.epoch.load(Ordering::Acquire);
            trace!(start, ?end, epoch, "prefetch request queued");
            shared
                .post(Box::new(move |worker: &mut Worker| worker.prefetch_range(epoch, start, end)))
                .is_ok()
        })
    }
}

/// One-way gate: `wait` blocks until `set` has been called.
pub(crate) struct Latch {
    set: Mutex<bool>,
    cv: Condvar,
}

impl Latch {
    pub fn new() -> Self {
        Self {
            set: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    pub fn set(&self) {
        *self.set.lock().unwrap_or_else(|e| e.into_inner()) = true;
        self.cv.notify_all();
    }

    pub fn reset(&self) {
        *self.set.lock().unwrap_or_else(|e| e.into_inner()) = false;
    }

    pub fn wait(&self) {
        let mut set = self.set.lock().unwrap_or_else(|e| e.into_inner());
        while !*set {
            set = self.cv.wait(set).unwrap_or_else(|e| e.into_inner());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn latch_releases_waiter() {
        let latch = Arc::new(Latch::new());
        let waiter = {
            let latch = latch.clone();
            std::thread::spawn(move || latch.wait())
        };
        std::thread::sleep(Duration::from_millis(10));
        latch.set();
        waiter.join().unwrap();
        // Already set: no blocking.
        latch.wait();
    }

    #[test]
    fn post_requires_running_worker() {
        let shared = Shared::new(1, 1024);
        assert_eq!(shared.post(Box::new(|_: &mut Worker| {})).err(), Some(Error::InvalidState));

        shared.running.store(true, Ordering::Release);
        assert_eq!(shared.post(Box::new(|_: &mut Worker| {})).err(), Some(Error::NullPointer));
    }

    #[test]
    fn requester_is_inert_once_client_is_gone() {
        let shared = Arc::new(Shared::new(1, 1024));
        let requester = shared.range_requester();
        // Not running: nothing queued.
        assert!(!requester.request(0, Some(99)));
        drop(shared);
        assert!(!requester.request(0, Some(99)));
    }

    #[test]
    fn requests_reach_the_mailbox() {
        let shared = Arc::new(Shared::new(1, 1024));
        let (tx, rx) = crossbeam_channel::unbounded();
        *shared.mailbox.lock().unwrap() = Some(tx);
        shared.running.store(true, Ordering::Release);
        assert!(shared.range_requester().request(100, None));
        assert!(matches!(rx.try_recv(), Ok(Command::Run(_))));

        shared.stop();
        assert!(matches!(rx.try_recv(), Ok(Command::Stop)));
    }
}
