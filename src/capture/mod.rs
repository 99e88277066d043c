//! Flow sources
//!
//! Two interchangeable producers publish canonical flow events to the
//! traffic topic: a live pcap sniffer with DPI (behind the `live-capture`
//! feature) and a deterministic synthetic generator for demo mode. Neither
//! knows anything about downstream analysis.

pub mod dns;
#[cfg(feature = "live-capture")]
pub mod sniffer;
pub mod synthetic;
pub mod tls;
