//! Curated threat-intelligence tables
//!
//! Static knowledge bases consulted by the detectors and the analyzer:
//! AI service domains, AI provider CIDR blocks, and JA3 client fingerprints.
//! All three are indexed once at startup and shared read-only.

pub mod ai_domains;
pub mod cidr;
pub mod ja3;

pub use ai_domains::AiDomainTable;
pub use cidr::{CidrMatch, CidrMatcher};
pub use ja3::{Ja3Category, Ja3Db, Ja3Entry, SpoofingVerdict};

/// Bundle of all intel tables, built once and carried by the engine context.
pub struct IntelDb {
    pub ai_domains: AiDomainTable,
    pub cidr: CidrMatcher,
    pub ja3: Ja3Db,
}

impl IntelDb {
    pub fn new() -> Self {
        Self {
            ai_domains: AiDomainTable::new(),
            cidr: CidrMatcher::new(),
            ja3: Ja3Db::new(),
        }
    }
}

impl Default for IntelDb {
    fn default() -> Self {
        Self::new()
    }
}
