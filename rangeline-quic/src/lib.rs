//! rangeline-quic — client-side QUIC via quinn-proto.
//!
//! [`QuicEndpoint`] wraps [quinn-proto](https://docs.rs/quinn-proto)'s sans-IO
//! state machine behind an event queue; [`UdpDriver`] moves datagrams between
//! a blocking `std::net::UdpSocket` and the endpoint with a bounded wait, so a
//! single thread can run the whole connection.
//!
//! # Example
//!
//! ```rust,ignore
//! use rangeline_quic::{QuicConfig, QuicEndpoint, QuicEvent, UdpDriver};
//!
//! let mut driver = UdpDriver::bind_for(peer)?;
//! let mut quic = QuicEndpoint::new(QuicConfig::new(client_config), driver.local_addr());
//! let conn = quic.connect(Instant::now(), peer, "example.com")?;
//! loop {
//!     driver.flush(&mut quic)?;
//!     driver.poll(&mut quic, Duration::from_millis(5))?;
//!     while let Some(event) = quic.poll_event() {
//!         if let QuicEvent::Connected(_) = event {
//!             // open streams
//!         }
//!     }
//! }
//! ```

pub mod config;
pub mod driver;
pub mod endpoint;
pub mod error;
pub mod event;

pub use config::QuicConfig;
pub use driver::UdpDriver;
pub use endpoint::{PathSnapshot, QuicEndpoint};
pub use error::Error;
pub use event::{QuicConnId, QuicEvent};

// Re-export commonly used quinn-proto types for convenience.
pub use quinn_proto::{ConnectionError, Dir, StreamId};
