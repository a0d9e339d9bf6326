//! HTTP/3 over QUIC, on rangeline-quic and rangeline-h3.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use quinn_proto::crypto::rustls::QuicClientConfig;
use quinn_proto::{IdleTimeout, TransportConfig};
use rangeline_h3::{H3Client, H3Event, HeaderField, Settings};
use rangeline_quic::{QuicConfig, QuicConnId, QuicEndpoint, QuicEvent, UdpDriver};
use tracing::{debug, info, trace, warn};

use super::{
    ResetReason, StreamDelegate, StreamId, Transport, TransportParams, TransportStats,
};
use crate::error::TransportError;
use crate::session::HeaderBlock;
use crate::tls;

/// Longest single wait while the handshake is in progress.
const HANDSHAKE_POLL: Duration = Duration::from_millis(10);

/// [`Transport`] speaking HTTP/3 to a single origin.
pub struct H3Transport {
    params: TransportParams,
    session: Option<H3Session>,
}

struct H3Session {
    quic: QuicEndpoint,
    driver: UdpDriver,
    h3: H3Client,
    conn: Option<QuicConnId>,
    connected: bool,
    /// Request streams still expecting events.
    streams: HashMap<u64, rangeline_quic::StreamId>,
}

impl H3Transport {
    pub fn new(params: TransportParams) -> Self {
        Self {
            params,
            session: None,
        }
    }

    fn quic_config(&self) -> Result<QuicConfig, TransportError> {
        let tls = tls::client_config(&self.params.verification)?;
        let crypto = QuicClientConfig::try_from(tls).map_err(|e| TransportError::Init(e.to_string()))?;
        let mut client = quinn_proto::ClientConfig::new(Arc::new(crypto));

        let mut transport = TransportConfig::default();
        let idle = self
            .params
            .idle_timeout
            .map(IdleTimeout::try_from)
            .transpose()
            .map_err(|e| TransportError::Init(format!("idle timeout: {e}")))?;
        transport.max_idle_timeout(idle);
        client.transport_config(Arc::new(transport));

        let config = QuicConfig::new(client);
        Ok(match self.params.version {
            Some(version) => config.with_version(version),
            None => config,
        })
    }
}

impl Transport for H3Transport {
    fn initialize(&mut self) -> Result<(), TransportError> {
        self.disconnect();
        let config = self.quic_config()?;
        let driver = UdpDriver::bind_for(self.params.peer)?;
        let quic = QuicEndpoint::new(config, driver.local_addr());
        debug!(local = %driver.local_addr(), peer = %self.params.peer, "transport initialized");
        self.session = Some(H3Session {
            quic,
            driver,
            h3: H3Client::new(Settings::default()),
            conn: None,
            connected: false,
            streams: HashMap::new(),
        });
        Ok(())
    }

    fn connect(&mut self) -> Result<(), TransportError> {
        let peer = self.params.peer;
        let deadline = Instant::now() + self.params.connect_timeout;
        let s = self.session.as_mut().ok_or(TransportError::NoSession)?;
        let conn = s
            .quic
            .connect(Instant::now(), peer, &self.params.server_name)
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        s.conn = Some(conn);

        // Stream events can ride in the same flight as the handshake's end.
        let mut early = Vec::new();
        loop {
            s.driver
                .flush(&mut s.quic)
                .map_err(|e| TransportError::Connect(e.to_string()))?;
            let mut established = false;
            while let Some(event) = s.quic.poll_event() {
                match event {
                    QuicEvent::Connected(c) if c == conn => established = true,
                    QuicEvent::ConnectionClosed { conn: c, reason } if c == conn => {
                        return Err(TransportError::Connect(reason.to_string()));
                    }
                    other => early.push(other),
                }
            }
            if established {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                s.quic.close_connection(conn, 0, b"handshake timeout");
                let _ = s.driver.flush(&mut s.quic);
                return Err(TransportError::Connect("handshake timed out".into()));
            }
            s.driver
                .poll(&mut s.quic, (deadline - now).min(HANDSHAKE_POLL))
                .map_err(|e| TransportError::Connect(e.to_string()))?;
        }

        s.h3
            .start(&mut s.quic, conn)
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        for event in &early {
            if let Err(e) = s.h3.handle_quic_event(&mut s.quic, event) {
                debug!(error = %e, "early event");
            }
        }
        s.connected = true;
        let _ = s.driver.flush(&mut s.quic);
        info!(%peer, server_name = %self.params.server_name, "connected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(|s| {
            s.connected && s.h3.is_open() && s.conn.is_some_and(|c| s.quic.is_established(c))
        })
    }

    fn disconnect(&mut self) {
        if let Some(mut s) = self.session.take() {
            s.h3.shutdown(&mut s.quic);
            let _ = s.driver.flush(&mut s.quic);
            debug!(open_streams = s.streams.len(), "transport disconnected");
        }
    }

    fn send_request(
        &mut self,
        headers: &HeaderBlock,
        body: &[u8],
        fin: bool,
        delegate: &mut dyn StreamDelegate,
    ) -> Result<StreamId, TransportError> {
        let s = self.session.as_mut().ok_or(TransportError::NoSession)?;
        if !s.connected {
            return Err(TransportError::NotConnected);
        }
        let fields: Vec<HeaderField> = headers
            .iter()
            .map(|(name, value)| HeaderField::new(name, value))
            .collect();
        let stream = s
            .h3
            .send_request(&mut s.quic, &fields, body, fin)
            .map_err(|e| TransportError::Send(e.to_string()))?;
        let _ = s.driver.flush(&mut s.quic);

        let id = u64::from(stream);
        s.streams.insert(id, stream);
        delegate.on_stream_created(StreamId(id));
        Ok(StreamId(id))
    }

    fn reset_stream(&mut self, stream: StreamId, reason: ResetReason) {
        let Some(s) = self.session.as_mut() else {
            return;
        };
        let Some(id) = s.streams.remove(&stream.0) else {
            return;
        };
        if let Err(e) = s.h3.cancel(&mut s.quic, id, reason.code()) {
            debug!(%stream, error = %e, "reset failed");
        }
        let _ = s.driver.flush(&mut s.quic);
        trace!(%stream, ?reason, "stream reset");
    }

    fn stats(&self) -> Result<TransportStats, TransportError> {
        let s = self.session.as_ref().ok_or(TransportError::NoSession)?;
        let conn = s.conn.ok_or(TransportError::NotConnected)?;
        let path = s.quic.stats(conn).map_err(|_| TransportError::NotConnected)?;
        let micros = path.rtt.as_micros() as u64;
        let bandwidth = match micros {
            0 => 0,
            us => path.cwnd.saturating_mul(8).saturating_mul(1_000_000) / us,
        };
        Ok(TransportStats {
            packets_lost: path.lost_packets,
            packets_reordered: 0,
            rtt: path.rtt,
            bandwidth,
        })
    }

    fn drive(&mut self, max_wait: Duration, delegate: &mut dyn StreamDelegate) {
        let Some(s) = self.session.as_mut() else {
            std::thread::sleep(max_wait);
            return;
        };
        if let Err(e) = s.driver.flush(&mut s.quic) {
            warn!(error = %e, "send failed");
        }
        if let Err(e) = s.driver.poll(&mut s.quic, max_wait) {
            warn!(error = %e, "receive failed");
            // Don't spin on a broken socket.
            std::thread::sleep(max_wait);
        }
        s.dispatch(delegate);
        let _ = s.driver.flush(&mut s.quic);
    }
}

impl H3Session {
    fn dispatch(&mut self, delegate: &mut dyn StreamDelegate) {
        while let Some(event) = self.quic.poll_event() {
            if let Err(e) = self.h3.handle_quic_event(&mut self.quic, &event) {
                debug!(error = %e, "h3 event");
            }
        }

        while let Some(event) = self.h3.poll_event() {
            match event {
                H3Event::Response {
                    stream_id,
                    headers,
                    end_stream,
                } => {
                    let id = u64::from(stream_id);
                    if !self.streams.contains_key(&id) {
                        continue;
                    }
                    let (status, block) = split_response(&headers);
                    delegate.on_response(StreamId(id), status, &block);
                    if end_stream {
                        self.close(id, delegate);
                    }
                }
                H3Event::Data {
                    stream_id,
                    data,
                    end_stream,
                } => {
                    let id = u64::from(stream_id);
                    if !self.streams.contains_key(&id) {
                        continue;
                    }
                    if !data.is_empty() {
                        delegate.on_data(StreamId(id), &data);
                    }
                    if end_stream {
                        self.close(id, delegate);
                    }
                }
                H3Event::Reset { stream_id, code } => {
                    debug!(stream = %stream_id, code, "stream reset by peer");
                    self.close(u64::from(stream_id), delegate);
                }
                H3Event::GoAway { id } => {
                    debug!(id, "goaway");
                    self.connected = false;
                }
                H3Event::Closed { reason, unfinished } => {
                    info!(%reason, unfinished = unfinished.len(), "connection closed");
                    self.connected = false;
                    let ids: Vec<u64> = self.streams.keys().copied().collect();
                    for id in ids {
                        self.close(id, delegate);
                    }
                }
                H3Event::Error(e) => {
                    warn!(error = %e, "h3 connection error");
                    self.connected = false;
                }
            }
        }
    }

    fn close(&mut self, id: u64, delegate: &mut dyn StreamDelegate) {
        if self.streams.remove(&id).is_some() {
            delegate.on_stream_closed(StreamId(id));
        }
    }
}

/// `:status` and the regular fields of a response head.
fn split_response(fields: &[HeaderField]) -> (u16, HeaderBlock) {
    let mut status = 0;
    let mut block = HeaderBlock::new();
    for field in fields {
        if field.name == b":status" {
            status = field.value_str().and_then(|v| v.parse().ok()).unwrap_or(0);
        } else if !field.name.starts_with(b":") {
            block.push(
                String::from_utf8_lossy(&field.name),
                String::from_utf8_lossy(&field.value),
            );
        }
    }
    (status, block)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_head_split() {
        let (status, block) = split_response(&[
            HeaderField::new(":status", "206"),
            HeaderField::new("content-range", "bytes 0-9/100"),
            HeaderField::new("content-length", "10"),
        ]);
        assert_eq!(status, 206);
        assert_eq!(block.len(), 2);
        assert_eq!(block.get("content-range"), Some("bytes 0-9/100"));
    }

    #[test]
    fn missing_status_is_zero() {
        let (status, block) = split_response(&[HeaderField::new("server", "x")]);
        assert_eq!(status, 0);
        assert_eq!(block.get("server"), Some("x"));
    }

    #[test]
    fn uninitialized_transport_has_no_session() {
        let mut t = H3Transport::new(TransportParams {
            peer: "127.0.0.1:4433".parse().unwrap(),
            server_name: "localhost".into(),
            version: None,
            verification: Default::default(),
            connect_timeout: Duration::from_secs(1),
            idle_timeout: None,
        });
        assert!(!t.is_connected());
        assert!(matches!(t.connect(), Err(TransportError::NoSession)));
        assert!(matches!(t.stats(), Err(TransportError::NoSession)));
        t.disconnect();
    }
}
