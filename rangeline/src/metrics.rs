//! rangeline client metrics.
//!
//! Process-wide counters across every [`Client`](crate::Client). Exposed
//! through metriken's registry to whatever exporter the embedder runs.

use metriken::{Counter, Gauge, metric};

// ── Bytes ────────────────────────────────────────────────────────

#[metric(
    name = "rangeline/bytes/received",
    description = "Response body bytes appended to client buffers"
)]
pub static BYTES_RECEIVED: Counter = Counter::new();

#[metric(
    name = "rangeline/bytes/delivered",
    description = "Bytes handed to readers"
)]
pub static BYTES_DELIVERED: Counter = Counter::new();

// ── Requests ─────────────────────────────────────────────────────

#[metric(
    name = "rangeline/requests/range",
    description = "Range requests sent, first windows included"
)]
pub static RANGE_REQUESTS: Counter = Counter::new();

#[metric(
    name = "rangeline/streams/reset",
    description = "Sub-streams reset by the client"
)]
pub static STREAM_RESETS: Counter = Counter::new();

#[metric(
    name = "rangeline/connections/reconnects",
    description = "Transport sessions re-established after a disconnect"
)]
pub static RECONNECTS: Counter = Counter::new();

// ── Seeks ────────────────────────────────────────────────────────

#[metric(
    name = "rangeline/seek/hits",
    description = "Seeks served from the buffer"
)]
pub static SEEK_HITS: Counter = Counter::new();

#[metric(
    name = "rangeline/seek/misses",
    description = "Seeks that went back to the network"
)]
pub static SEEK_MISSES: Counter = Counter::new();

// ── Clients ──────────────────────────────────────────────────────

#[metric(
    name = "rangeline/clients/active",
    description = "Clients with a running worker"
)]
pub static ACTIVE_CLIENTS: Gauge = Gauge::new();
