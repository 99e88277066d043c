//! Kill-chain stage mapping
//!
//! Assigns each alert to one of five attacker stages by description
//! keywords, falling back to the ML classification and then severity.

use serde::Serialize;

use crate::models::{Alert, KillchainStage, MlClass, Severity};

/// Keyword sets per stage, checked in descending stage order so the most
/// advanced matching stage wins.
const STAGE_KEYWORDS: &[(KillchainStage, &[&str])] = &[
    (
        KillchainStage::Impact,
        &["violation", "breach", "critical", "block", "policy", "quarantine"],
    ),
    (
        KillchainStage::Exfiltration,
        &["exfiltration", "upload", "large transfer", "data leak", "tunneling", "api key"],
    ),
    (
        KillchainStage::Execution,
        &["ai service", "chatgpt", "claude", "copilot", "gemini", "midjourney", "prompt", "spoofing"],
    ),
    (
        KillchainStage::InitialAccess,
        &["unauthorized", "shadow", "first seen", "new connection", "unknown service", "unusual port"],
    ),
    (
        KillchainStage::Reconnaissance,
        &["scan", "probe", "discover", "dns", "lookup", "resolve"],
    ),
];

/// Stage for one alert's description + ML context.
pub fn stage_for(
    description: &str,
    ml_classification: Option<MlClass>,
    severity: Severity,
) -> KillchainStage {
    let lower = description.to_ascii_lowercase();
    for (stage, keywords) in STAGE_KEYWORDS {
        if keywords.iter().any(|kw| lower.contains(kw)) {
            return *stage;
        }
    }

    if ml_classification == Some(MlClass::ShadowAi) {
        return KillchainStage::Execution;
    }
    match severity {
        Severity::High => KillchainStage::Impact,
        Severity::Medium => KillchainStage::Execution,
        Severity::Low => KillchainStage::Reconnaissance,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageSummary {
    pub id: &'static str,
    pub label: &'static str,
    pub count: usize,
    pub active: bool,
    /// Up to ten most recent alerts in this stage
    pub alerts: Vec<StageAlert>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageAlert {
    pub id: String,
    pub description: String,
    pub severity: Severity,
    pub source: String,
    pub target: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KillchainReport {
    pub stages: Vec<StageSummary>,
    pub total_alerts: usize,
    pub active_stages: usize,
    /// 20 points per active stage
    pub chain_completion: u32,
}

/// Summarize the alert history into the five-stage chain.
pub fn summarize(alerts: &[Alert]) -> KillchainReport {
    let mut stages: Vec<StageSummary> = KillchainStage::ALL
        .iter()
        .map(|stage| StageSummary {
            id: stage.as_str(),
            label: stage.label(),
            count: 0,
            active: false,
            alerts: Vec::new(),
        })
        .collect();

    for alert in alerts.iter().rev() {
        let idx = KillchainStage::ALL
            .iter()
            .position(|s| *s == alert.killchain_stage)
            .unwrap_or(0);
        let summary = &mut stages[idx];
        summary.count += 1;
        if summary.alerts.len() < 10 {
            summary.alerts.push(StageAlert {
                id: alert.id.clone(),
                description: alert.description.clone(),
                severity: alert.severity,
                source: alert.source.clone(),
                target: alert.target.clone(),
                timestamp: alert.timestamp,
            });
        }
    }

    let mut active_stages = 0;
    for summary in &mut stages {
        summary.active = summary.count > 0;
        if summary.active {
            active_stages += 1;
        }
    }

    KillchainReport {
        stages,
        total_alerts: alerts.len(),
        active_stages,
        chain_completion: (active_stages as u32) * 20,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::test_support::alert_at;
    use chrono::Utc;

    #[test]
    fn keywords_pick_the_most_advanced_stage() {
        assert_eq!(
            stage_for("Potential DNS tunneling detected", None, Severity::Medium),
            KillchainStage::Exfiltration
        );
        assert_eq!(
            stage_for("Policy rule matched: Block ChatGPT (block)", None, Severity::High),
            KillchainStage::Impact
        );
        assert_eq!(
            stage_for("Known AI service [LLM] accessed: chatgpt.com", None, Severity::High),
            KillchainStage::Execution
        );
        assert_eq!(
            stage_for("Outbound traffic on unusual port 6667", None, Severity::Medium),
            KillchainStage::InitialAccess
        );
    }

    #[test]
    fn ml_shadow_classification_falls_back_to_execution() {
        assert_eq!(
            stage_for("no keywords here", Some(MlClass::ShadowAi), Severity::Low),
            KillchainStage::Execution
        );
    }

    #[test]
    fn severity_fallback() {
        assert_eq!(stage_for("xyzzy", None, Severity::High), KillchainStage::Impact);
        assert_eq!(stage_for("xyzzy", None, Severity::Low), KillchainStage::Reconnaissance);
    }

    #[test]
    fn chain_completion_counts_active_stages() {
        let now = Utc::now();
        let mut a1 = alert_at("1", "10.0.0.5", "chatgpt.com", Severity::High, now);
        a1.killchain_stage = KillchainStage::Execution;
        let mut a2 = alert_at("2", "10.0.0.5", "example.com", Severity::Medium, now);
        a2.killchain_stage = KillchainStage::Exfiltration;

        let report = summarize(&[a1, a2]);
        assert_eq!(report.active_stages, 2);
        assert_eq!(report.chain_completion, 40);
        assert_eq!(report.total_alerts, 2);
    }
}
