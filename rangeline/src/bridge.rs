//! Calls from the invoking thread into the worker.
//!
//! A call is a closure posted to the worker's mailbox together with a
//! one-shot [`Reply`]. The caller decides how long to wait on the matching
//! [`Pending`]; the worker always runs the closure to completion, so a
//! caller that gives up early only loses the result.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};

use crate::error::{Error, Result};
use crate::worker::Worker;

/// How long the invoking thread waits for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Block until the operation completes.
    Forever,
    /// Return immediately.
    NoWait,
    /// Block for at most this long.
    Deadline(Duration),
}

impl Wait {
    /// Map the integer timeout convention: negative waits forever, zero does
    /// not wait, positive is a deadline in milliseconds.
    pub fn from_millis(ms: i64) -> Self {
        match ms {
            ms if ms < 0 => Wait::Forever,
            0 => Wait::NoWait,
            ms => Wait::Deadline(Duration::from_millis(ms.unsigned_abs())),
        }
    }
}

/// Work executed on the worker thread.
pub(crate) type Task = Box<dyn FnOnce(&mut Worker) + Send>;

pub(crate) enum Command {
    Run(Task),
    Stop,
}

/// Write half of a one-shot result cell. Consumed by `send`, so a result
/// is written at most once.
pub(crate) struct Reply<T>(Sender<T>);

/// Read half of a one-shot result cell.
pub(crate) struct Pending<T>(Receiver<T>);

pub(crate) fn oneshot<T>() -> (Reply<T>, Pending<T>) {
    let (tx, rx) = bounded(1);
    (Reply(tx), Pending(rx))
}

impl<T> Reply<T> {
    pub(crate) fn send(self, value: T) {
        // The caller may have timed out and dropped its end.
        let _ = self.0.send(value);
    }
}

impl<T> Pending<T> {
    /// Wait for the result under `wait`.
    ///
    /// `Timeout` when nothing arrived in time, `InvalidState` when the worker
    /// dropped the reply without answering (it stopped first).
    pub(crate) fn wait(self, wait: Wait) -> Result<T> {
        match wait {
            Wait::Forever => self.0.recv().map_err(|_| Error::InvalidState),
            Wait::NoWait => self.0.try_recv().map_err(|e| match e {
                TryRecvError::Empty => Error::Timeout,
                TryRecvError::Disconnected => Error::InvalidState,
            }),
            Wait::Deadline(d) => self.0.recv_timeout(d).map_err(|e| match e {
                RecvTimeoutError::Timeout => Error::Timeout,
                RecvTimeoutError::Disconnected => Error::InvalidState,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn integer_timeouts() {
        assert_eq!(Wait::from_millis(-1), Wait::Forever);
        assert_eq!(Wait::from_millis(-500), Wait::Forever);
        assert_eq!(Wait::from_millis(0), Wait::NoWait);
        assert_eq!(
            Wait::from_millis(5000),
            Wait::Deadline(Duration::from_millis(5000))
        );
    }

    #[test]
    fn reply_delivered() {
        let (reply, pending) = oneshot();
        reply.send(7u64);
        assert_eq!(pending.wait(Wait::Forever), Ok(7));
    }

    #[test]
    fn deadline_elapses() {
        let (_reply, pending) = oneshot::<u64>();
        let start = Instant::now();
        assert_eq!(
            pending.wait(Wait::Deadline(Duration::from_millis(20))),
            Err(Error::Timeout)
        );
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn no_wait_does_not_block() {
        let (_reply, pending) = oneshot::<u64>();
        assert_eq!(pending.wait(Wait::NoWait), Err(Error::Timeout));
    }

    #[test]
    fn dropped_reply_is_invalid_state() {
        let (reply, pending) = oneshot::<u64>();
        drop(reply);
        assert_eq!(pending.wait(Wait::Forever), Err(Error::InvalidState));
    }

    #[test]
    fn late_reply_after_timeout_is_harmless() {
        let (reply, pending) = oneshot::<u64>();
        assert_eq!(pending.wait(Wait::NoWait), Err(Error::Timeout));
        reply.send(1);
    }

    #[test]
    fn reply_from_another_thread() {
        let (reply, pending) = oneshot();
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            reply.send("done");
        });
        assert_eq!(pending.wait(Wait::Deadline(Duration::from_secs(5))), Ok("done"));
        t.join().unwrap();
    }
}
