//! Per-endpoint risk scoring

use std::collections::HashMap;

use serde::Serialize;

use crate::models::{Alert, Edge, Severity};

#[derive(Debug, Clone, Serialize)]
pub struct RiskScore {
    pub ip: String,
    /// `min(100, 5*high + 2*medium + low + 0.05*edge_count)`
    pub risk_pct: f64,
    pub total_alerts: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

/// Risk per alerting source, sorted highest first.
pub fn risk_scores(alerts: &[Alert], edges: &[Edge]) -> Vec<RiskScore> {
    let mut edge_counts: HashMap<&str, usize> = HashMap::new();
    for edge in edges {
        *edge_counts.entry(edge.source.as_str()).or_default() += 1;
    }

    let mut per_source: HashMap<&str, RiskScore> = HashMap::new();
    for alert in alerts {
        let entry = per_source
            .entry(alert.source.as_str())
            .or_insert_with(|| RiskScore {
                ip: alert.source.clone(),
                risk_pct: 0.0,
                total_alerts: 0,
                high: 0,
                medium: 0,
                low: 0,
            });
        entry.total_alerts += 1;
        match alert.severity {
            Severity::High => entry.high += 1,
            Severity::Medium => entry.medium += 1,
            Severity::Low => entry.low += 1,
        }
    }

    let mut scores: Vec<RiskScore> = per_source
        .into_values()
        .map(|mut score| {
            let edge_count = edge_counts.get(score.ip.as_str()).copied().unwrap_or(0);
            score.risk_pct = (5.0 * score.high as f64
                + 2.0 * score.medium as f64
                + score.low as f64
                + 0.05 * edge_count as f64)
                .min(100.0);
            score
        })
        .collect();

    scores.sort_by(|a, b| b.risk_pct.total_cmp(&a.risk_pct));
    scores
}
