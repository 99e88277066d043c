//! AI provider CIDR threat intelligence
//!
//! Catches Shadow AI traffic that bypasses DNS (direct IP access,
//! SDK-pinned endpoints) by matching destination addresses against CIDR
//! blocks attributed to AI providers.

use std::net::IpAddr;

use ipnetwork::IpNetwork;

use crate::models::{is_multicast_or_broadcast, is_private_ip, Severity};

struct CidrRecord {
    cidr: &'static str,
    provider: &'static str,
    service: &'static str,
    risk: Severity,
    category: &'static str,
    data_risk: &'static str,
    compliance_tags: &'static [&'static str],
}

const AI_CIDR_TABLE: &[CidrRecord] = &[
    CidrRecord {
        cidr: "13.107.42.0/24",
        provider: "OpenAI",
        service: "ChatGPT / GPT-4 API",
        risk: Severity::High,
        category: "LLM",
        data_risk: "Prompts may contain PII, proprietary code or trade secrets",
        compliance_tags: &["SOC2", "GDPR", "HIPAA"],
    },
    CidrRecord {
        cidr: "13.107.43.0/24",
        provider: "OpenAI",
        service: "GPT-4 Turbo API",
        risk: Severity::High,
        category: "LLM",
        data_risk: "High-throughput API access, bulk exfiltration risk",
        compliance_tags: &["SOC2", "GDPR", "HIPAA"],
    },
    CidrRecord {
        cidr: "40.119.0.0/16",
        provider: "OpenAI (Azure)",
        service: "Azure OpenAI Service",
        risk: Severity::High,
        category: "LLM",
        data_risk: "Enterprise AI access via Azure may bypass network controls",
        compliance_tags: &["SOC2", "GDPR"],
    },
    CidrRecord {
        cidr: "34.102.136.0/24",
        provider: "Anthropic",
        service: "Claude API",
        risk: Severity::High,
        category: "LLM",
        data_risk: "Large context window enables bulk data ingestion",
        compliance_tags: &["SOC2", "GDPR", "HIPAA"],
    },
    CidrRecord {
        cidr: "34.102.137.0/24",
        provider: "Anthropic",
        service: "Claude API",
        risk: Severity::High,
        category: "LLM",
        data_risk: "Multi-modal endpoints may process sensitive documents",
        compliance_tags: &["SOC2", "GDPR", "HIPAA"],
    },
    CidrRecord {
        cidr: "142.250.0.0/16",
        provider: "Google",
        service: "Gemini / Vertex AI",
        risk: Severity::Medium,
        category: "LLM",
        data_risk: "Data may feed model improvement without explicit consent",
        compliance_tags: &["SOC2", "GDPR"],
    },
    CidrRecord {
        cidr: "54.164.0.0/16",
        provider: "Hugging Face",
        service: "Inference API / Model Hub",
        risk: Severity::Medium,
        category: "ML Infra",
        data_risk: "Variable data handling policies across hosted models",
        compliance_tags: &["SOC2"],
    },
    CidrRecord {
        cidr: "104.18.0.0/16",
        provider: "Stability AI",
        service: "Stable Diffusion API",
        risk: Severity::Medium,
        category: "Image Gen",
        data_risk: "Prompt text may leak IP via image descriptions",
        compliance_tags: &["SOC2"],
    },
    CidrRecord {
        cidr: "35.203.0.0/16",
        provider: "Cohere",
        service: "Embed / Generate API",
        risk: Severity::Medium,
        category: "LLM",
        data_risk: "Embedding API exposes document semantics to a third party",
        compliance_tags: &["SOC2", "GDPR"],
    },
    CidrRecord {
        cidr: "44.226.0.0/16",
        provider: "Replicate",
        service: "Model hosting platform",
        risk: Severity::Medium,
        category: "ML Infra",
        data_risk: "Data processed on shared multi-tenant infrastructure",
        compliance_tags: &["SOC2"],
    },
    CidrRecord {
        cidr: "51.159.0.0/16",
        provider: "Mistral AI",
        service: "Mistral Large / Le Chat",
        risk: Severity::Medium,
        category: "LLM",
        data_risk: "Data sovereignty varies by deployment",
        compliance_tags: &["SOC2", "GDPR"],
    },
    CidrRecord {
        cidr: "76.76.21.0/24",
        provider: "Groq",
        service: "LPU Inference API",
        risk: Severity::Medium,
        category: "ML Infra",
        data_risk: "High-throughput inference of uploaded content",
        compliance_tags: &["SOC2"],
    },
];

/// Successful CIDR table hit.
#[derive(Debug, Clone)]
pub struct CidrMatch {
    pub cidr: String,
    pub provider: &'static str,
    pub service: &'static str,
    pub risk: Severity,
    pub category: &'static str,
    pub data_risk: &'static str,
    pub compliance_tags: &'static [&'static str],
}

/// Pre-parsed CIDR matcher. Linear scan; the table is small.
pub struct CidrMatcher {
    entries: Vec<(IpNetwork, &'static CidrRecord)>,
}

impl CidrMatcher {
    pub fn new() -> Self {
        let entries = AI_CIDR_TABLE
            .iter()
            .filter_map(|rec| rec.cidr.parse::<IpNetwork>().ok().map(|net| (net, rec)))
            .collect();
        Self { entries }
    }

    /// Look up a destination address. Private, loopback and multicast
    /// addresses never match.
    pub fn lookup(&self, ip: &IpAddr) -> Option<CidrMatch> {
        if is_private_ip(ip) || is_multicast_or_broadcast(ip) {
            return None;
        }

        self.entries
            .iter()
            .find(|(net, _)| net.contains(*ip))
            .map(|(net, rec)| CidrMatch {
                cidr: net.to_string(),
                provider: rec.provider,
                service: rec.service,
                risk: rec.risk,
                category: rec.category,
                data_risk: rec.data_risk,
                compliance_tags: rec.compliance_tags,
            })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CidrMatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_known_provider_block() {
        let matcher = CidrMatcher::new();
        let hit = matcher.lookup(&"13.107.42.14".parse().unwrap()).unwrap();
        assert_eq!(hit.provider, "OpenAI");
        assert_eq!(hit.risk, Severity::High);
    }

    #[test]
    fn private_addresses_never_match() {
        let matcher = CidrMatcher::new();
        assert!(matcher.lookup(&"192.168.1.1".parse().unwrap()).is_none());
        assert!(matcher.lookup(&"127.0.0.1".parse().unwrap()).is_none());
        assert!(matcher.lookup(&"224.0.0.251".parse().unwrap()).is_none());
    }

    #[test]
    fn unlisted_public_address_misses() {
        let matcher = CidrMatcher::new();
        assert!(matcher.lookup(&"203.0.113.5".parse().unwrap()).is_none());
    }
}
