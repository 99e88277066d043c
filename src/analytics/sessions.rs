//! Alert session reconstruction
//!
//! A session is a maximal run of alerts from the same source where
//! consecutive alerts are at most five minutes apart. Single-alert runs
//! are dropped from the output.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{Alert, Severity};

use super::profiles::SeverityBreakdown;

/// Maximum gap between consecutive alerts of one session
const SESSION_GAP_SECS: i64 = 300;

/// Sessions need at least this many alerts to be reported
const MIN_SESSION_ALERTS: usize = 2;

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub source: String,
    pub alert_count: usize,
    pub destinations: Vec<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: i64,
    pub severity_breakdown: SeverityBreakdown,
    /// Weighted severity sum (3/2/1)
    pub risk_score: u64,
    pub max_severity: Severity,
    /// Chronological alert timeline
    pub timeline: Vec<SessionEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionEvent {
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub severity: Severity,
    pub target: String,
}

/// Reconstruct sessions from the alert history, highest risk first.
pub fn sessions(alerts: &[Alert]) -> Vec<Session> {
    let mut by_source: HashMap<&str, Vec<&Alert>> = HashMap::new();
    for alert in alerts {
        by_source.entry(alert.source.as_str()).or_default().push(alert);
    }

    let mut result = Vec::new();
    let mut session_counter = 0usize;

    let mut sources: Vec<&str> = by_source.keys().copied().collect();
    sources.sort();

    for source in sources {
        let mut source_alerts = by_source.remove(source).unwrap();
        source_alerts.sort_by_key(|a| a.timestamp);

        let mut run: Vec<&Alert> = Vec::new();
        for alert in source_alerts {
            if let Some(last) = run.last() {
                let gap = (alert.timestamp - last.timestamp).num_seconds();
                if gap > SESSION_GAP_SECS {
                    flush_run(&mut run, source, &mut session_counter, &mut result);
                }
            }
            run.push(alert);
        }
        flush_run(&mut run, source, &mut session_counter, &mut result);
    }

    result.sort_by(|a, b| b.risk_score.cmp(&a.risk_score).then(a.id.cmp(&b.id)));
    result
}

fn flush_run(
    run: &mut Vec<&Alert>,
    source: &str,
    counter: &mut usize,
    out: &mut Vec<Session>,
) {
    if run.len() >= MIN_SESSION_ALERTS {
        out.push(build_session(*counter, source, run));
        *counter += 1;
    }
    run.clear();
}

fn build_session(id: usize, source: &str, run: &[&Alert]) -> Session {
    let mut breakdown = SeverityBreakdown::default();
    let mut destinations = Vec::new();
    let mut max_severity = Severity::Low;

    for alert in run {
        match alert.severity {
            Severity::High => breakdown.high += 1,
            Severity::Medium => breakdown.medium += 1,
            Severity::Low => breakdown.low += 1,
        }
        max_severity = max_severity.max(alert.severity);
        if !destinations.contains(&alert.target) {
            destinations.push(alert.target.clone());
        }
    }

    let start = run.first().unwrap().timestamp;
    let end = run.last().unwrap().timestamp;

    Session {
        id: format!("session-{id}"),
        source: source.to_string(),
        alert_count: run.len(),
        destinations,
        start_time: start,
        end_time: end,
        duration_seconds: (end - start).num_seconds(),
        severity_breakdown: breakdown,
        risk_score: (breakdown.high * 3 + breakdown.medium * 2 + breakdown.low) as u64,
        max_severity,
        timeline: run
            .iter()
            .map(|a| SessionEvent {
                timestamp: a.timestamp,
                description: a.description.clone(),
                severity: a.severity,
                target: a.target.clone(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::test_support::alert_at;
    use chrono::Duration;

    #[test]
    fn splits_on_five_minute_gap_and_drops_singletons() {
        let t0 = Utc::now();
        let alerts = vec![
            alert_at("1", "10.0.0.5", "a", Severity::Low, t0),
            alert_at("2", "10.0.0.5", "b", Severity::Low, t0 + Duration::seconds(30)),
            alert_at("3", "10.0.0.5", "c", Severity::Low, t0 + Duration::seconds(60)),
            alert_at("4", "10.0.0.5", "d", Severity::Low, t0 + Duration::minutes(7)),
            alert_at("5", "10.0.0.5", "e", Severity::Low, t0 + Duration::minutes(7) + Duration::seconds(30)),
            alert_at("6", "10.0.0.5", "f", Severity::Low, t0 + Duration::minutes(20)),
        ];

        let sessions = sessions(&alerts);
        assert_eq!(sessions.len(), 2, "singleton at t+20min must be excluded");

        let mut counts: Vec<usize> = sessions.iter().map(|s| s.alert_count).collect();
        counts.sort();
        assert_eq!(counts, vec![2, 3]);
    }

    #[test]
    fn boundary_gap_of_exactly_five_minutes_stays_in_session() {
        let t0 = Utc::now();
        let alerts = vec![
            alert_at("1", "10.0.0.5", "a", Severity::Low, t0),
            alert_at("2", "10.0.0.5", "b", Severity::Low, t0 + Duration::seconds(300)),
        ];
        assert_eq!(sessions(&alerts).len(), 1);
    }

    #[test]
    fn session_aggregates_destinations_and_risk() {
        let t0 = Utc::now();
        let alerts = vec![
            alert_at("1", "10.0.0.5", "chatgpt.com", Severity::High, t0),
            alert_at("2", "10.0.0.5", "chatgpt.com", Severity::Medium, t0 + Duration::seconds(10)),
        ];

        let sessions = sessions(&alerts);
        let s = &sessions[0];
        assert_eq!(s.destinations, vec!["chatgpt.com"]);
        assert_eq!(s.risk_score, 5);
        assert_eq!(s.max_severity, Severity::High);
        assert_eq!(s.duration_seconds, 10);
        assert_eq!(s.timeline.len(), 2);
    }

    #[test]
    fn sources_are_not_mixed() {
        let t0 = Utc::now();
        let alerts = vec![
            alert_at("1", "10.0.0.5", "a", Severity::Low, t0),
            alert_at("2", "10.0.0.6", "b", Severity::Low, t0 + Duration::seconds(5)),
        ];
        assert!(sessions(&alerts).is_empty());
    }
}
