//! HTTP/3 client framing layer for rangeline-quic.
//!
//! This crate provides a sans-IO HTTP/3 client that sits on top of
//! [`rangeline_quic::QuicEndpoint`]. It handles:
//!
//! - HTTP/3 frame encoding/decoding (DATA, HEADERS, SETTINGS, GOAWAY)
//! - QPACK field sections against the static table, including Huffman
//!   coded literals from servers
//! - Control stream management (SETTINGS exchange, GOAWAY)
//! - Request streams with incremental response bodies, cancellation and
//!   flow-control aware request writes
//!
//! # Architecture
//!
//! ```text
//!   UDP datagrams
//!        │
//!   ┌────▼──────────┐
//!   │rangeline-quic │  QUIC transport (quinn-proto wrapper)
//!   │ QuicEndpoint  │  QuicEvent: StreamReadable, StreamOpened, etc.
//!   └────┬──────────┘
//!        │ stream_recv() / stream_send()
//!   ┌────▼──────────┐
//!   │ rangeline-h3  │  HTTP/3 framing + QPACK
//!   │   H3Client    │  H3Event: Response, Data, Reset, etc.
//!   └───────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use rangeline_h3::{H3Client, H3Event, HeaderField, Settings};
//!
//! let mut h3 = H3Client::new(Settings::default());
//! h3.start(&mut quic, conn)?;
//! let stream = h3.send_request(&mut quic, &[
//!     HeaderField::new(":method", "GET"),
//!     HeaderField::new(":scheme", "https"),
//!     HeaderField::new(":authority", "example.com"),
//!     HeaderField::new(":path", "/video.mp4"),
//!     HeaderField::new("range", "bytes=0-1048575"),
//! ], &[], true)?;
//!
//! // After quic.poll_event():
//! h3.handle_quic_event(&mut quic, &event)?;
//! while let Some(event) = h3.poll_event() {
//!     if let H3Event::Data { data, end_stream, .. } = event {
//!         // consume body bytes
//!     }
//! }
//! ```

pub mod connection;
pub mod error;
pub mod frame;
mod huffman;
pub mod qpack;
pub mod settings;
mod stream;

pub use connection::{H3Client, H3Event};
pub use error::{H3Error, codes};
pub use frame::Frame;
pub use qpack::HeaderField;
pub use settings::Settings;
