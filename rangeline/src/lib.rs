//! rangeline — blocking, seekable reads of a remote resource over HTTP/3.
//!
//! A [`Client`] presents one resource as an `open/read/seek/close` file.
//! Behind it a worker thread owns a QUIC connection and fetches the
//! resource as byte ranges: a first window on `open`, further windows from
//! a [`Prefetcher`] as the reader consumes, and a fresh range whenever a
//! seek lands outside what is buffered.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::io::{Read, Seek, SeekFrom};
//! use rangeline::{Client, OpenOptions, Wait, Window};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::new();
//!     client.open(
//!         OpenOptions::new("https://cdn.example.com/movie.mp4").window(Window::Bytes(1 << 20)),
//!         Wait::from_millis(5000),
//!     )?;
//!
//!     let mut reader = client.reader(Wait::Forever);
//!     let mut header = [0u8; 16];
//!     reader.read_exact(&mut header)?;
//!     reader.seek(SeekFrom::End(-4096))?;
//!     let mut tail = Vec::new();
//!     reader.read_to_end(&mut tail)?;
//!
//!     println!("{:?}", client.get_stats()?);
//!     client.close();
//!     Ok(())
//! }
//! ```
//!
//! # Threads
//!
//! The thread calling [`Client`] methods never touches the connection.
//! `open`, `request`, `seek` and `get_stats` run on the worker and the
//! caller waits for them per [`Wait`]; `read_buffer` waits on the shared
//! buffer directly.

// ── Internal modules ────────────────────────────────────────────────────
pub(crate) mod bridge;
pub(crate) mod buffer;
pub(crate) mod client;
pub(crate) mod connection;
pub(crate) mod metadata;
pub(crate) mod seek;
pub(crate) mod session;
pub(crate) mod shared;
pub(crate) mod stats;
pub(crate) mod stream;
pub(crate) mod tls;
pub(crate) mod worker;

// ── Public modules ──────────────────────────────────────────────────────
pub mod config;
pub mod error;
pub mod metrics;
pub mod prefetch;
pub mod transport;

// ── Re-exports ──────────────────────────────────────────────────────────

pub use bridge::Wait;
pub use client::{Client, Reader};
pub use config::{ClientConfig, ClientConfigBuilder, READ_BLOCK_SIZE};
pub use error::{Error, Result, TransportError};
pub use prefetch::{
    BlockPrefetcher, InFlight, PrefetchFactory, Prefetcher, RangeRequester, block_prefetcher,
};
pub use seek::Whence;
pub use session::{
    DEFAULT_REQUEST_BLOCK, HeaderBlock, MIN_REQUEST_BLOCK, OpenOptions, QuicVersions, Request,
    Window,
};
pub use stats::Stats;
pub use tls::Verification;
