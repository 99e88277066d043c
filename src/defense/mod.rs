//! Active defense
//!
//! Two cooperating pieces: the interrogator probes suspicious external
//! destinations to confirm AI services, and the response manager keeps a
//! TTL-bounded quarantine blocklist. Both are advisory; nothing touches the
//! OS firewall.

mod interrogator;
mod response;

pub use interrogator::{Interrogator, ProbeError, ProbeReport};
pub use response::{BlockOutcome, ResponseManager};
