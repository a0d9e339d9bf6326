//! Connection setup and range requests, run on the worker.

use std::sync::atomic::Ordering;
use std::time::Instant;

use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::metrics;
use crate::session::{
    Marks, OpenOptions, Request, Session, Target, build_headers, normalize_headers, range_value,
    resolve_peer,
};
use crate::tls::Verification;
use crate::transport::{ResetReason, Transport, TransportParams};
use crate::worker::Worker;

impl Worker {
    /// Resolve, connect and send the first window of the resource.
    pub(crate) fn open_session(&mut self, options: OpenOptions) -> Result<()> {
        let mut marks = Marks::new();
        let target = Target::parse(&options.url)?;
        let version = options.versions.resolve()?;

        let peer = resolve_peer(&target, options.ip.as_deref(), options.port)?;
        marks.resolved = Some(Instant::now());
        debug!(host = %target.host, %peer, "resolved");

        let verification = if options.verify_identity {
            self.config.verification.clone()
        } else {
            Verification::AcceptAll
        };
        let mut transport = (self.config.transport)(TransportParams {
            peer,
            server_name: target.host.clone(),
            version,
            verification,
            connect_timeout: self.config.connect_timeout,
            idle_timeout: self.config.idle_timeout,
        });
        establish(&mut *transport)?;
        marks.connected = Some(Instant::now());
        self.transport = Some(transport);

        let extra = normalize_headers(&options.headers);
        let headers = build_headers(&target, &options.method, &extra);
        let window = options.window;
        self.session = Some(Session {
            target,
            method: options.method,
            extra,
            body: options.body,
            window,
            hint: options.hint,
            headers,
            marks,
        });
        self.tracker.begin_resource(window.block_size(), options.hint);
        self.send(window.first_end().map(|end| (0, Some(end))), true)
    }

    /// Switch to another resource on the same connection.
    pub(crate) fn request(&mut self, request: Request) -> Result<()> {
        let target = Target::parse(&request.url)?;
        if self.session.is_none() {
            return Err(Error::NullPointer);
        }

        self.cancel_active(ResetReason::Cancelled);
        {
            let _state = self.shared.buffer.lock();
            self.shared.epoch.fetch_add(1, Ordering::AcqRel);
        }
        self.shared.buffer.clear();

        let session = self.session.as_mut().ok_or(Error::NullPointer)?;
        session.extra = normalize_headers(&request.headers);
        session.headers = build_headers(&target, &request.method, &session.extra);
        session.target = target;
        session.method = request.method;
        session.body = request.body;
        let (window, hint) = (session.window, session.hint);
        info!(method = %session.method, path = %session.target.path, "switching resource");

        self.tracker.begin_resource(window.block_size(), hint);
        self.ensure_connected()?;
        self.send(window.first_end().map(|end| (0, Some(end))), true)
    }

    /// Ask for `[start, end]`, reconnecting once first if the connection
    /// has dropped.
    pub(crate) fn request_range(&mut self, start: u64, end: Option<u64>) -> Result<()> {
        self.ensure_connected()?;
        self.send(Some((start, end)), false)
    }

    /// Range request queued by a prefetcher. Dropped when a seek or a
    /// resource switch happened since it was made.
    pub(crate) fn prefetch_range(&mut self, epoch: u64, start: u64, end: Option<u64>) {
        if self.shared.epoch.load(Ordering::Acquire) != epoch {
            trace!(start, ?end, epoch, "stale prefetch dropped");
            return;
        }
        if let Err(e) = self.request_range(start, end) {
            warn!(start, ?end, error = %e, "prefetch request failed");
        }
    }

    /// Reset and forget the active stream.
    pub(crate) fn cancel_active(&mut self, reason: ResetReason) {
        let Some(stream) = self.tracker.take_active() else {
            return;
        };
        if let Some(transport) = self.transport.as_mut() {
            transport.reset_stream(stream, reason);
            metrics::STREAM_RESETS.increment();
            debug!(%stream, ?reason, "stream cancelled");
        }
    }

    fn ensure_connected(&mut self) -> Result<()> {
        let transport = self.transport.as_mut().ok_or(Error::NullPointer)?;
        if transport.is_connected() {
            return Ok(());
        }
        info!("connection lost, reconnecting");
        self.tracker.forget_streams();
        establish(&mut **transport)?;
        metrics::RECONNECTS.increment();
        Ok(())
    }

    /// Send the session's request with `range` (none: the whole resource).
    /// Only the first request of a resource carries the body.
    fn send(&mut self, range: Option<(u64, Option<u64>)>, with_body: bool) -> Result<()> {
        let session = self.session.as_mut().ok_or(Error::NullPointer)?;
        let transport = self.transport.as_mut().ok_or(Error::NullPointer)?;
        match range {
            Some((start, end)) => session.headers.set("range", range_value(start, end)),
            None => session.headers.remove("range"),
        }
        let (start, end) = range.unwrap_or((0, None));
        self.tracker.expect_range(start, end);
        let body: &[u8] = if with_body { &session.body } else { &[] };
        let stream = transport.send_request(&session.headers, body, true, &mut self.tracker)?;
        metrics::RANGE_REQUESTS.increment();
        debug!(%stream, range = session.headers.get("range").unwrap_or("none"), "request sent");
        self.reset_retired();
        Ok(())
    }
}

/// Build the transport session and connect it.
fn establish(transport: &mut dyn Transport) -> Result<()> {
    transport.initialize().map_err(|e| {
        warn!(error = %e, "transport initialize failed");
        Error::FatalError
    })?;
    transport.connect().map_err(|e| {
        warn!(error = %e, "connect failed");
        Error::ConnectFail
    })
}
