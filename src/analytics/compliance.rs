//! Compliance posture scoring
//!
//! Scores SOC 2, GDPR and HIPAA against counters derived from the alert
//! history and the policy table. Each framework has a closed set of checks
//! evaluated to pass/warn/fail; framework score is `100 * pass / total`.

use serde::Serialize;

use crate::models::{Alert, PolicyAction, PolicyRule, Severity};

use super::dlp;
use super::is_shadow_alert;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComplianceCheck {
    pub name: &'static str,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Framework {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub checks: Vec<ComplianceCheck>,
    pub score: u32,
    pub pass_count: usize,
    pub warn_count: usize,
    pub fail_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComplianceReport {
    pub frameworks: Vec<Framework>,
    pub overall_score: u32,
    pub total_checks: usize,
    pub violations: usize,
}

struct Counters {
    total: usize,
    shadow_ai: usize,
    high_severity: usize,
    dlp_incidents: usize,
    block_rules: usize,
}

fn counters(alerts: &[Alert], rules: &[PolicyRule]) -> Counters {
    Counters {
        total: alerts.len(),
        shadow_ai: alerts.iter().filter(|a| is_shadow_alert(a)).count(),
        high_severity: alerts.iter().filter(|a| a.severity == Severity::High).count(),
        dlp_incidents: dlp::incidents(alerts).summary.total_incidents,
        block_rules: rules
            .iter()
            .filter(|r| r.enabled && r.action == PolicyAction::Block)
            .count(),
    }
}

fn grade(fail: bool, warn: bool) -> CheckStatus {
    if fail {
        CheckStatus::Fail
    } else if warn {
        CheckStatus::Warn
    } else {
        CheckStatus::Pass
    }
}

/// Evaluate all frameworks over the current snapshot.
pub fn report(alerts: &[Alert], rules: &[PolicyRule]) -> ComplianceReport {
    let c = counters(alerts, rules);

    let soc2 = vec![
        ComplianceCheck {
            name: "Shadow AI monitoring",
            status: grade(c.shadow_ai > 10 && c.block_rules == 0, c.shadow_ai > 0),
            detail: format!("{} Shadow AI events, {} blocking rules", c.shadow_ai, c.block_rules),
        },
        ComplianceCheck {
            name: "Data loss prevention",
            status: grade(c.dlp_incidents > 2, c.dlp_incidents > 0),
            detail: format!("{} potential DLP incidents", c.dlp_incidents),
        },
        ComplianceCheck {
            name: "Access monitoring",
            status: grade(false, c.total == 0),
            detail: format!("monitoring active, {} events scored", c.total),
        },
        ComplianceCheck {
            name: "Policy enforcement",
            status: grade(c.block_rules == 0, c.block_rules < 2),
            detail: format!("{} blocking rules active", c.block_rules),
        },
    ];

    let gdpr = vec![
        ComplianceCheck {
            name: "PII protection",
            status: grade(c.dlp_incidents > 1, c.dlp_incidents > 0),
            detail: format!("{} PII exposure risks", c.dlp_incidents),
        },
        ComplianceCheck {
            name: "Processing records",
            status: CheckStatus::Pass,
            detail: "alert history retained".to_string(),
        },
        ComplianceCheck {
            name: "Cross-border transfer control",
            status: grade(c.shadow_ai > 2, c.shadow_ai > 0),
            detail: format!("{} transfers to external AI services", c.shadow_ai),
        },
        ComplianceCheck {
            name: "Erasure controls",
            status: CheckStatus::Warn,
            detail: "manual review required".to_string(),
        },
    ];

    let hipaa = vec![
        ComplianceCheck {
            name: "PHI safeguards",
            status: grade(c.high_severity > 3, c.high_severity > 0),
            detail: format!("{} high-severity events", c.high_severity),
        },
        ComplianceCheck {
            name: "Access controls",
            status: grade(c.block_rules == 0, false),
            detail: format!("{} access control policies", c.block_rules),
        },
        ComplianceCheck {
            name: "Audit trail",
            status: CheckStatus::Pass,
            detail: "full event logging enabled".to_string(),
        },
        ComplianceCheck {
            name: "Breach notification",
            status: grade(false, c.total == 0),
            detail: "real-time alerting active".to_string(),
        },
    ];

    let frameworks: Vec<Framework> = [
        ("soc2", "SOC 2", "Service organization controls for data security", soc2),
        ("gdpr", "GDPR", "EU personal data protection", gdpr),
        ("hipaa", "HIPAA", "Protected health information safeguards", hipaa),
    ]
    .into_iter()
    .map(|(id, name, description, checks)| {
        let pass_count = checks.iter().filter(|c| c.status == CheckStatus::Pass).count();
        let warn_count = checks.iter().filter(|c| c.status == CheckStatus::Warn).count();
        let fail_count = checks.iter().filter(|c| c.status == CheckStatus::Fail).count();
        let score = (100 * pass_count / checks.len()) as u32;
        Framework {
            id,
            name,
            description,
            checks,
            score,
            pass_count,
            warn_count,
            fail_count,
        }
    })
    .collect();

    let overall_score =
        (frameworks.iter().map(|f| f.score).sum::<u32>() / frameworks.len() as u32) as u32;
    let total_checks = frameworks.iter().map(|f| f.checks.len()).sum();
    let violations = frameworks.iter().map(|f| f.fail_count).sum();

    ComplianceReport {
        frameworks,
        overall_score,
        total_checks,
        violations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::test_support::alert_at;
    use chrono::Utc;

    #[test]
    fn clean_history_scores_well() {
        let rules = vec![PolicyRule {
            id: "r1".to_string(),
            name: "Block ChatGPT".to_string(),
            action: PolicyAction::Block,
            service: "chatgpt".to_string(),
            department: "All".to_string(),
            severity: Severity::High,
            enabled: true,
            description: String::new(),
        }];
        let alerts = vec![alert_at("1", "10.0.0.5", "x", Severity::Low, Utc::now())];

        let report = report(&alerts, &rules);
        assert_eq!(report.frameworks.len(), 3);
        assert_eq!(report.total_checks, 12);
        assert!(report.overall_score > 50);
    }

    #[test]
    fn shadow_ai_flood_without_block_rules_fails_soc2() {
        let mut alerts = Vec::new();
        for i in 0..12 {
            let mut a = alert_at(&i.to_string(), "10.0.0.5", "chatgpt.com", Severity::High, Utc::now());
            a.matched_rule = Some("ai_domain:openai.com".to_string());
            alerts.push(a);
        }

        let report = report(&alerts, &[]);
        let soc2 = &report.frameworks[0];
        let monitoring = &soc2.checks[0];
        assert_eq!(monitoring.status, CheckStatus::Fail);
        assert!(report.violations > 0);
    }
}
