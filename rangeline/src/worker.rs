//! The worker thread: owns the transport and runs its event loop.
//!
//! Everything network-facing lives here and is touched only from the
//! worker thread. The invoking thread reaches it through posted tasks
//! (see [`bridge`](crate::bridge)) and through the shared buffer.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use tracing::{debug, info, warn};

use crate::bridge::{Command, Reply};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::metrics;
use crate::session::{OpenOptions, Session};
use crate::shared::Shared;
use crate::stream::StreamTracker;
use crate::transport::Transport;

pub(crate) struct Worker {
    pub(crate) shared: Arc<Shared>,
    pub(crate) config: ClientConfig,
    pub(crate) session: Option<Session>,
    pub(crate) transport: Option<Box<dyn Transport>>,
    pub(crate) tracker: StreamTracker,
}

impl Worker {
    pub fn new(shared: Arc<Shared>, config: ClientConfig) -> Self {
        let tracker = StreamTracker::new(shared.clone(), config.prefetch.clone());
        Self {
            shared,
            config,
            session: None,
            transport: None,
            tracker,
        }
    }

    /// Thread body: open the session, serve the mailbox until told to stop,
    /// then tear down. A failed open ends the thread straight away; the
    /// client stays busy until `close`.
    pub fn run(mut self, mailbox: Receiver<Command>, options: OpenOptions, reply: Reply<Result<()>>) {
        self.shared.running.store(true, Ordering::Release);
        self.shared.started.set();
        metrics::ACTIVE_CLIENTS.increment();

        let opened = self.open_session(options);
        let ok = opened.is_ok();
        if let Err(e) = &opened {
            info!(error = %e, "open failed");
        }
        reply.send(opened);

        if ok {
            self.event_loop(&mailbox);
        }
        self.teardown();
        metrics::ACTIVE_CLIENTS.decrement();
    }

    fn event_loop(&mut self, mailbox: &Receiver<Command>) {
        loop {
            loop {
                match mailbox.try_recv() {
                    Ok(Command::Run(task)) => task(self),
                    Ok(Command::Stop) | Err(TryRecvError::Disconnected) => return,
                    Err(TryRecvError::Empty) => break,
                }
            }

            match self.transport.as_mut() {
                Some(transport) => {
                    transport.drive(self.config.tick, &mut self.tracker);
                    self.reset_retired();
                    if let Some(offset) = self.tracker.take_resume()
                        && let Err(e) = self.request_range(offset, None)
                    {
                        warn!(offset, error = %e, "resume failed");
                    }
                }
                None => match mailbox.recv_timeout(self.config.tick) {
                    Ok(Command::Run(task)) => task(self),
                    Ok(Command::Stop) | Err(RecvTimeoutError::Disconnected) => return,
                    Err(RecvTimeoutError::Timeout) => {}
                },
            }
        }
    }

    /// Reset streams the tracker has let go of.
    pub(crate) fn reset_retired(&mut self) {
        let retired = self.tracker.take_retired();
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        for (stream, reason) in retired {
            transport.reset_stream(stream, reason);
            metrics::STREAM_RESETS.increment();
            debug!(%stream, ?reason, "stream reset");
        }
    }

    fn teardown(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.disconnect();
        }
        self.session = None;
        self.tracker.forget_streams();
        self.shared.buffer.clear();
        {
            // Under the buffer lock so a reader can't miss the wakeup.
            let _state = self.shared.buffer.lock();
            self.shared.running.store(false, Ordering::Release);
            self.shared.buffer.notify();
        }
        self.shared
            .mailbox
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        debug!("worker stopped");
    }
}
