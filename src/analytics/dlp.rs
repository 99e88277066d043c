//! Data-loss-prevention incident extraction
//!
//! Flags alerts that look like data leaving the network: single flows with
//! more than a megabyte sent, or descriptions/targets matching known leak
//! patterns (PII to chatbots, credentials to code assistants, document and
//! source uploads).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{Alert, Severity};

/// Uploads above this size are DLP incidents regardless of pattern
const DLP_BYTES_SENT: u64 = 1_048_576;

struct DlpPattern {
    id: &'static str,
    label: &'static str,
    description: &'static str,
    severity: Severity,
    keywords: &'static [&'static str],
}

const DLP_PATTERNS: &[DlpPattern] = &[
    DlpPattern {
        id: "pii_exposure",
        label: "PII Exposure Risk",
        description: "Outbound traffic to a conversational AI service may contain personal data",
        severity: Severity::High,
        keywords: &["chatgpt", "claude", "gemini", "perplexity", "shadow ai", "pii"],
    },
    DlpPattern {
        id: "api_key_leak",
        label: "Credential Leak Risk",
        description: "Payload to a code assistant may contain API keys or secrets",
        severity: Severity::High,
        keywords: &["copilot", "cursor", "replit", "api key", "secret"],
    },
    DlpPattern {
        id: "code_snippet",
        label: "Source Code Upload",
        description: "Source code may have been shared with an AI coding tool",
        severity: Severity::Medium,
        keywords: &["code ai", "codeium", "tabnine", "sourcegraph"],
    },
    DlpPattern {
        id: "document_upload",
        label: "Document Upload Risk",
        description: "Document content may have been shared with an external AI service",
        severity: Severity::Medium,
        keywords: &["document", "upload", "anthropic", "notebooklm"],
    },
];

#[derive(Debug, Clone, Serialize)]
pub struct DlpIncident {
    pub id: String,
    pub alert_id: String,
    #[serde(rename = "type")]
    pub incident_type: &'static str,
    pub label: &'static str,
    pub description: &'static str,
    pub severity: Severity,
    pub source: String,
    pub target: String,
    pub bytes_sent: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DlpSummary {
    pub total_incidents: usize,
    pub high_severity: usize,
    pub types: HashMap<&'static str, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DlpReport {
    pub incidents: Vec<DlpIncident>,
    pub summary: DlpSummary,
}

/// Extract DLP incidents from the alert history, newest first.
pub fn incidents(alerts: &[Alert]) -> DlpReport {
    let mut incidents = Vec::new();

    for alert in alerts {
        let haystack = format!("{} {}", alert.description, alert.target).to_ascii_lowercase();

        let matched = DLP_PATTERNS
            .iter()
            .find(|p| p.keywords.iter().any(|kw| haystack.contains(kw)));

        let incident = match matched {
            Some(pattern) => Some((pattern.id, pattern.label, pattern.description, pattern.severity)),
            None if alert.bytes_sent > DLP_BYTES_SENT => Some((
                "data_exfiltration",
                "Data Exfiltration",
                "Significant data volume transferred to an external service",
                Severity::High,
            )),
            None => None,
        };

        if let Some((id, label, description, severity)) = incident {
            incidents.push(DlpIncident {
                id: format!("dlp-{}", alert.id),
                alert_id: alert.id.clone(),
                incident_type: id,
                label,
                description,
                severity,
                source: alert.source.clone(),
                target: alert.target.clone(),
                bytes_sent: alert.bytes_sent,
                timestamp: alert.timestamp,
            });
        }
    }

    incidents.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    incidents.truncate(50);

    let mut types: HashMap<&'static str, usize> = HashMap::new();
    for incident in &incidents {
        *types.entry(incident.incident_type).or_default() += 1;
    }

    let summary = DlpSummary {
        total_incidents: incidents.len(),
        high_severity: incidents
            .iter()
            .filter(|i| i.severity == Severity::High)
            .count(),
        types,
    };

    DlpReport { incidents, summary }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::test_support::alert_at;
    use chrono::Utc;

    #[test]
    fn keyword_patterns_classify_incidents() {
        let now = Utc::now();
        let mut pii = alert_at("1", "10.0.0.5", "chatgpt.com", Severity::High, now);
        pii.description = "Known AI service [LLM] accessed: chatgpt.com".to_string();

        let report = incidents(&[pii]);
        assert_eq!(report.incidents.len(), 1);
        assert_eq!(report.incidents[0].incident_type, "pii_exposure");
    }

    #[test]
    fn megabyte_upload_is_exfiltration_even_without_keywords() {
        let now = Utc::now();
        let mut big = alert_at("1", "10.0.0.5", "storage.example", Severity::Medium, now);
        big.description = "no interesting words".to_string();
        big.bytes_sent = 2 * 1024 * 1024;

        let report = incidents(&[big]);
        assert_eq!(report.incidents[0].incident_type, "data_exfiltration");
        assert_eq!(report.summary.high_severity, 1);
    }

    #[test]
    fn boundary_at_one_megabyte_is_exclusive() {
        let now = Utc::now();
        let mut exact = alert_at("1", "10.0.0.5", "storage.example", Severity::Low, now);
        exact.description = "nothing".to_string();
        exact.bytes_sent = DLP_BYTES_SENT;

        assert!(incidents(&[exact]).incidents.is_empty());
    }
}
