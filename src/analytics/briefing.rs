//! Executive threat briefing
//!
//! Deterministic template filled from the alert history and kill-chain
//! summary: a threat level plus ordered narrative paragraphs.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{Alert, Severity};

use super::is_shadow_alert;
use super::killchain::KillchainReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThreatLevel {
    Low,
    Elevated,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct Paragraph {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub title: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BriefingStats {
    pub total_alerts: usize,
    pub high_severity: usize,
    pub shadow_ai: usize,
    pub unique_sources: usize,
    pub unique_targets: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Briefing {
    pub threat_level: ThreatLevel,
    pub generated_at: DateTime<Utc>,
    pub period: &'static str,
    pub paragraphs: Vec<Paragraph>,
    pub stats: BriefingStats,
}

fn threat_level(chain_completion: u32, shadow_ai: usize, high: usize) -> ThreatLevel {
    if chain_completion >= 80 || shadow_ai > 10 {
        ThreatLevel::Critical
    } else if chain_completion >= 60 || shadow_ai > 5 || high > 5 {
        ThreatLevel::High
    } else if chain_completion >= 40 || high > 0 {
        ThreatLevel::Elevated
    } else {
        ThreatLevel::Low
    }
}

/// Build the briefing from the current snapshot.
pub fn briefing(alerts: &[Alert], killchain: &KillchainReport, now: DateTime<Utc>) -> Briefing {
    let total = alerts.len();
    let high = alerts.iter().filter(|a| a.severity == Severity::High).count();
    let medium = alerts.iter().filter(|a| a.severity == Severity::Medium).count();
    let low = total - high - medium;
    let shadow_ai = alerts.iter().filter(|a| is_shadow_alert(a)).count();

    let mut sources: HashMap<&str, usize> = HashMap::new();
    let mut targets: HashMap<&str, usize> = HashMap::new();
    for alert in alerts {
        *sources.entry(alert.source.as_str()).or_default() += 1;
        *targets.entry(alert.target.as_str()).or_default() += 1;
    }

    let level = threat_level(killchain.chain_completion, shadow_ai, high);
    let stats = BriefingStats {
        total_alerts: total,
        high_severity: high,
        shadow_ai,
        unique_sources: sources.len(),
        unique_targets: targets.len(),
    };

    if total == 0 {
        return Briefing {
            threat_level: ThreatLevel::Low,
            generated_at: now,
            period: "current session",
            paragraphs: vec![Paragraph {
                kind: "status",
                title: "Status",
                text: Some(
                    "No security events recorded yet. Monitoring is active and scanning for \
                     Shadow AI activity, unauthorized transfers and policy violations."
                        .to_string(),
                ),
                items: Vec::new(),
            }],
            stats,
        };
    }

    let mut paragraphs = Vec::new();

    paragraphs.push(Paragraph {
        kind: "overview",
        title: "Situation Overview",
        text: Some(format!(
            "The monitoring session has classified {total} security events: {high} high, \
             {medium} medium and {low} low severity. {} of 5 kill-chain stages are active \
             (completion {}%). Current threat level: {level:?}.",
            killchain.active_stages, killchain.chain_completion
        )),
        items: Vec::new(),
    });

    if shadow_ai > 0 {
        let assessment = if shadow_ai > 5 {
            "This volume represents a significant compliance exposure requiring immediate review."
        } else {
            "Events are being monitored and correlated for pattern analysis."
        };
        paragraphs.push(Paragraph {
            kind: "shadow_ai",
            title: "Shadow AI Activity",
            text: Some(format!(
                "{shadow_ai} unauthorized AI service interactions were detected. {assessment}"
            )),
            items: Vec::new(),
        });
    }

    let top_source = sources.iter().max_by_key(|(ip, count)| (**count, std::cmp::Reverse(*ip)));
    let top_target = targets.iter().max_by_key(|(t, count)| (**count, std::cmp::Reverse(*t)));
    if let (Some((src, src_count)), Some((dst, dst_count))) = (top_source, top_target) {
        paragraphs.push(Paragraph {
            kind: "actor",
            title: "Primary Actor",
            text: Some(format!(
                "The most active source is {src} with {src_count} events; the most contacted \
                 destination is {dst} ({dst_count} events)."
            )),
            items: Vec::new(),
        });
    }

    let mut recommendations = Vec::new();
    if high > 0 {
        recommendations.push("Investigate all HIGH severity alerts and isolate affected endpoints".to_string());
    }
    if shadow_ai > 0 {
        recommendations.push("Review and enforce AI usage policy across all departments".to_string());
    }
    if sources.len() > 3 {
        recommendations.push(format!(
            "Audit the {} distinct alerting sources for unsanctioned tooling",
            sources.len()
        ));
    }
    recommendations.push("Keep real-time monitoring and DLP policies enabled".to_string());
    paragraphs.push(Paragraph {
        kind: "recommendations",
        title: "Recommended Actions",
        text: None,
        items: recommendations,
    });

    paragraphs.push(Paragraph {
        kind: "status",
        title: "Status",
        text: Some("Monitoring continues; this briefing regenerates on demand.".to_string()),
        items: Vec::new(),
    });

    Briefing {
        threat_level: level,
        generated_at: now,
        period: "current session",
        paragraphs,
        stats,
    }
}
