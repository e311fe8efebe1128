//! shoreline runtime metrics.
//!
//! Static counters for connection lifecycle, byte flow, and transport
//! edge conditions. Exposed through the `metriken` registry.

use metriken::{metric, Counter, Gauge};

#[metric(
    name = "shoreline/connections/accepted",
    description = "Total peers admitted"
)]
pub static CONNECTIONS_ACCEPTED: Counter = Counter::new();

#[metric(
    name = "shoreline/connections/closed",
    description = "Total peers torn down"
)]
pub static CONNECTIONS_CLOSED: Counter = Counter::new();

#[metric(
    name = "shoreline/connections/active",
    description = "Currently owned peers"
)]
pub static CONNECTIONS_ACTIVE: Gauge = Gauge::new();

#[metric(name = "shoreline/bytes/received", description = "Total bytes received")]
pub static BYTES_RECEIVED: Counter = Counter::new();

#[metric(name = "shoreline/bytes/sent", description = "Total bytes sent")]
pub static BYTES_SENT: Counter = Counter::new();

#[metric(
    name = "shoreline/writes/buffered",
    description = "Writes that hit would-block and were buffered"
)]
pub static WRITES_BUFFERED: Counter = Counter::new();

#[metric(
    name = "shoreline/reads/oversized",
    description = "Incoming reads dropped for overrunning the scratch buffer"
)]
pub static OVERSIZED_READS: Counter = Counter::new();
