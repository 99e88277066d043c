//! Per-source behavioral profiles

use std::collections::HashMap;

use chrono::{DateTime, Local, Timelike, Utc};
use serde::Serialize;

use crate::models::{Alert, Severity};

#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub ip: String,
    pub alert_count: usize,
    /// Weighted severity sum (3/2/1)
    pub risk_score: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub top_destinations: Vec<DestinationCount>,
    pub severity_breakdown: SeverityBreakdown,
    /// Alerts per local hour of day
    pub hour_histogram: [u64; 24],
    pub anomalies: Vec<ProfileAnomaly>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DestinationCount {
    pub target: String,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SeverityBreakdown {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileAnomaly {
    pub kind: &'static str,
    pub detail: String,
}

struct ProfileAccumulator {
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    destinations: HashMap<String, usize>,
    breakdown: SeverityBreakdown,
    hours: [u64; 24],
    count: usize,
}

/// Build behavioral profiles from the alert history, highest risk first.
pub fn profiles(alerts: &[Alert]) -> Vec<UserProfile> {
    let mut per_source: HashMap<&str, ProfileAccumulator> = HashMap::new();

    for alert in alerts {
        let acc = per_source
            .entry(alert.source.as_str())
            .or_insert_with(|| ProfileAccumulator {
                first_seen: alert.timestamp,
                last_seen: alert.timestamp,
                destinations: HashMap::new(),
                breakdown: SeverityBreakdown::default(),
                hours: [0; 24],
                count: 0,
            });

        acc.count += 1;
        acc.first_seen = acc.first_seen.min(alert.timestamp);
        acc.last_seen = acc.last_seen.max(alert.timestamp);
        *acc.destinations.entry(alert.target.clone()).or_default() += 1;
        match alert.severity {
            Severity::High => acc.breakdown.high += 1,
            Severity::Medium => acc.breakdown.medium += 1,
            Severity::Low => acc.breakdown.low += 1,
        }
        let local_hour = alert.timestamp.with_timezone(&Local).hour() as usize;
        acc.hours[local_hour] += 1;
    }

    let mut result: Vec<UserProfile> = per_source
        .into_iter()
        .map(|(ip, acc)| {
            let mut top: Vec<DestinationCount> = acc
                .destinations
                .iter()
                .map(|(target, count)| DestinationCount {
                    target: target.clone(),
                    count: *count,
                })
                .collect();
            top.sort_by(|a, b| b.count.cmp(&a.count).then(a.target.cmp(&b.target)));
            top.truncate(5);

            let anomalies = detect_anomalies(&acc, &top);
            let risk_score = (acc.breakdown.high * 3 + acc.breakdown.medium * 2 + acc.breakdown.low)
                as u64;

            UserProfile {
                ip: ip.to_string(),
                alert_count: acc.count,
                risk_score,
                first_seen: acc.first_seen,
                last_seen: acc.last_seen,
                top_destinations: top,
                severity_breakdown: acc.breakdown,
                hour_histogram: acc.hours,
                anomalies,
            }
        })
        .collect();

    result.sort_by(|a, b| b.risk_score.cmp(&a.risk_score).then(a.ip.cmp(&b.ip)));
    result
}

fn detect_anomalies(acc: &ProfileAccumulator, top: &[DestinationCount]) -> Vec<ProfileAnomaly> {
    let mut anomalies = Vec::new();
    let total = acc.count.max(1);

    // Activity outside 08:00-20:00 local
    let off_hours: u64 = acc
        .hours
        .iter()
        .enumerate()
        .filter(|(hour, _)| *hour < 8 || *hour >= 20)
        .map(|(_, count)| count)
        .sum();
    if off_hours as f64 / total as f64 >= 0.3 {
        anomalies.push(ProfileAnomaly {
            kind: "unusual_hours",
            detail: format!("{off_hours} alerts outside business hours"),
        });
    }

    if let Some(first) = top.first() {
        if first.count as f64 / total as f64 >= 0.7 {
            anomalies.push(ProfileAnomaly {
                kind: "single_target_focus",
                detail: format!("{} of {} alerts target {}", first.count, total, first.target),
            });
        }
    }

    if acc.breakdown.high as f64 / total as f64 >= 0.3 {
        anomalies.push(ProfileAnomaly {
            kind: "high_severity_ratio",
            detail: format!("{}/{} alerts are HIGH severity", acc.breakdown.high, total),
        });
    }

    anomalies
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::test_support::alert_at;
    use chrono::{Duration, TimeZone};

    /// A timestamp whose local hour is fixed regardless of host timezone.
    fn at_local_hour(hour: u32) -> DateTime<Utc> {
        Local
            .with_ymd_and_hms(2026, 7, 1, hour, 30, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn single_target_focus_flags_at_seventy_percent() {
        let now = at_local_hour(12);
        let mut alerts = Vec::new();
        for i in 0..7 {
            alerts.push(alert_at(&format!("a{i}"), "10.0.0.5", "chatgpt.com", Severity::Low, now));
        }
        for i in 0..3 {
            alerts.push(alert_at(&format!("b{i}"), "10.0.0.5", "other.com", Severity::Low, now));
        }

        let profiles = profiles(&alerts);
        assert_eq!(profiles.len(), 1);
        assert!(profiles[0]
            .anomalies
            .iter()
            .any(|a| a.kind == "single_target_focus"));
    }

    #[test]
    fn unusual_hours_flags_night_activity() {
        let night = at_local_hour(2);
        let day = at_local_hour(14);
        let alerts = vec![
            alert_at("1", "10.0.0.5", "x", Severity::Low, night),
            alert_at("2", "10.0.0.5", "x", Severity::Low, night + Duration::minutes(5)),
            alert_at("3", "10.0.0.5", "x", Severity::Low, day),
        ];

        let profiles = profiles(&alerts);
        assert!(profiles[0].anomalies.iter().any(|a| a.kind == "unusual_hours"));
    }

    #[test]
    fn high_severity_ratio_threshold() {
        let now = at_local_hour(12);
        let alerts = vec![
            alert_at("1", "10.0.0.5", "a", Severity::High, now),
            alert_at("2", "10.0.0.5", "b", Severity::Low, now),
            alert_at("3", "10.0.0.5", "c", Severity::Low, now),
        ];
        let profiles = profiles(&alerts);
        assert!(profiles[0]
            .anomalies
            .iter()
            .any(|a| a.kind == "high_severity_ratio"));
        assert_eq!(profiles[0].risk_score, 5);
    }
}
