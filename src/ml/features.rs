//! Flow feature extraction
//!
//! Converts a flow event into the fixed numeric vector consumed by the
//! anomaly and classification models. The feature list is frozen at
//! model-load time; changing it requires retraining.

use crate::models::{FlowEvent, Protocol};

pub const NUM_FEATURES: usize = 13;

pub const FEATURE_NAMES: [&str; NUM_FEATURES] = [
    "dst_port_norm",
    "bytes_sent_log",
    "bytes_received_log",
    "duration_ms_log",
    "sni_entropy",
    "tld_rank",
    "proto_tcp",
    "proto_udp",
    "proto_icmp",
    "proto_http",
    "proto_https",
    "proto_dns",
    "proto_other",
];

pub type FeatureVector = [f64; NUM_FEATURES];

/// TLDs ordered by how often they show up in unsanctioned AI endpoints;
/// unknown TLDs rank in the middle.
fn tld_rank(host: &str) -> f64 {
    let tld = host.rsplit('.').next().unwrap_or("");
    match tld.to_ascii_lowercase().as_str() {
        "com" | "org" | "net" | "edu" | "gov" => 0.1,
        "co" | "io" | "dev" | "cloud" => 0.4,
        "ai" | "art" | "chat" | "new" | "xyz" | "ht" | "sh" => 0.8,
        "" => 0.0,
        _ => 0.5,
    }
}

/// Shannon entropy of the hostname characters, in bits.
fn hostname_entropy(host: &str) -> f64 {
    if host.is_empty() {
        return 0.0;
    }
    let mut counts = [0u32; 256];
    for b in host.bytes() {
        counts[b as usize] += 1;
    }
    let len = host.len() as f64;
    counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Stateless feature extractor.
pub struct FeatureExtractor;

impl FeatureExtractor {
    pub fn extract(&self, event: &FlowEvent) -> FeatureVector {
        let host = event.hostname().unwrap_or("");
        let duration_ms: f64 = event
            .metadata
            .get("duration_ms")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0);

        let mut features = [0.0; NUM_FEATURES];
        features[0] = event.destination_port as f64 / 65535.0;
        features[1] = (event.bytes_sent as f64).ln_1p();
        features[2] = (event.bytes_received as f64).ln_1p();
        features[3] = duration_ms.ln_1p();
        features[4] = hostname_entropy(host);
        features[5] = tld_rank(host);

        let proto_index = match event.protocol {
            Protocol::Tcp => 6,
            Protocol::Udp => 7,
            Protocol::Icmp => 8,
            Protocol::Http => 9,
            Protocol::Https => 10,
            Protocol::Dns => 11,
            Protocol::Other => 12,
        };
        features[proto_index] = 1.0;

        features
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    fn event(protocol: Protocol, sni: Option<&str>) -> FlowEvent {
        let mut metadata = HashMap::new();
        if let Some(sni) = sni {
            metadata.insert("sni".to_string(), sni.to_string());
        }
        FlowEvent {
            timestamp: Utc::now(),
            source_ip: "10.0.0.5".parse().unwrap(),
            destination_ip: "203.0.113.9".parse().unwrap(),
            source_port: 50000,
            destination_port: 443,
            protocol,
            bytes_sent: 1000,
            bytes_received: 5000,
            ja3_hash: None,
            metadata,
        }
    }

    #[test]
    fn vector_has_fixed_width() {
        let v = FeatureExtractor.extract(&event(Protocol::Https, Some("api.openai.com")));
        assert_eq!(v.len(), NUM_FEATURES);
        assert_eq!(FEATURE_NAMES.len(), NUM_FEATURES);
    }

    #[test]
    fn protocol_onehot_is_exclusive() {
        let v = FeatureExtractor.extract(&event(Protocol::Dns, None));
        let onehot: f64 = v[6..].iter().sum();
        assert_eq!(onehot, 1.0);
        assert_eq!(v[11], 1.0);
    }

    #[test]
    fn entropy_grows_with_hostname_randomness() {
        let plain = FeatureExtractor.extract(&event(Protocol::Https, Some("aaaa.com")));
        let noisy = FeatureExtractor.extract(&event(Protocol::Https, Some("x7f9q2k4z8.com")));
        assert!(noisy[4] > plain[4]);
    }

    #[test]
    fn ai_tlds_rank_higher_than_com() {
        let com = FeatureExtractor.extract(&event(Protocol::Https, Some("example.com")));
        let ai = FeatureExtractor.extract(&event(Protocol::Https, Some("claude.ai")));
        assert!(ai[5] > com[5]);
    }
}
