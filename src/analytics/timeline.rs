//! Alert timeline bucketing

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::Serialize;

use crate::models::{Alert, Severity};

/// Number of one-minute buckets covered by the timeline
const TIMELINE_MINUTES: i64 = 60;

#[derive(Debug, Clone, Serialize)]
pub struct TimelineBucket {
    /// Bucket start as HH:MM (UTC)
    pub time: String,
    #[serde(rename = "HIGH")]
    pub high: usize,
    #[serde(rename = "MEDIUM")]
    pub medium: usize,
    #[serde(rename = "LOW")]
    pub low: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineFilters {
    pub protocols: Vec<String>,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineReport {
    pub buckets: Vec<TimelineBucket>,
    pub filters: TimelineFilters,
    pub total_alerts: usize,
}

/// Bucket alerts from the last hour per minute and severity.
pub fn report(alerts: &[Alert], now: DateTime<Utc>) -> TimelineReport {
    let window_start = (now - Duration::minutes(TIMELINE_MINUTES - 1))
        .duration_trunc(Duration::minutes(1))
        .unwrap_or(now);

    let mut buckets: Vec<TimelineBucket> = (0..TIMELINE_MINUTES)
        .map(|i| TimelineBucket {
            time: (window_start + Duration::minutes(i)).format("%H:%M").to_string(),
            high: 0,
            medium: 0,
            low: 0,
            total: 0,
        })
        .collect();

    let mut protocols = BTreeSet::new();
    let mut sources = BTreeSet::new();
    let mut counted = 0usize;

    for alert in alerts {
        protocols.insert(alert.protocol.to_string());
        sources.insert(alert.source.clone());

        let offset = (alert.timestamp - window_start).num_minutes();
        if !(0..TIMELINE_MINUTES).contains(&offset) {
            continue;
        }
        let bucket = &mut buckets[offset as usize];
        match alert.severity {
            Severity::High => bucket.high += 1,
            Severity::Medium => bucket.medium += 1,
            Severity::Low => bucket.low += 1,
        }
        bucket.total += 1;
        counted += 1;
    }

    TimelineReport {
        buckets,
        filters: TimelineFilters {
            protocols: protocols.into_iter().collect(),
            sources: sources.into_iter().collect(),
        },
        total_alerts: counted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::test_support::alert_at;

    #[test]
    fn produces_sixty_buckets_and_counts_recent_alerts() {
        let now = Utc::now();
        let alerts = vec![
            alert_at("1", "10.0.0.5", "a", Severity::High, now),
            alert_at("2", "10.0.0.5", "b", Severity::Low, now - Duration::minutes(5)),
            alert_at("3", "10.0.0.5", "c", Severity::Low, now - Duration::hours(2)),
        ];

        let report = report(&alerts, now);
        assert_eq!(report.buckets.len(), 60);
        assert_eq!(report.total_alerts, 2, "two-hour-old alert is out of window");

        let total_high: usize = report.buckets.iter().map(|b| b.high).sum();
        assert_eq!(total_high, 1);
    }

    #[test]
    fn filters_collect_distinct_values() {
        let now = Utc::now();
        let alerts = vec![
            alert_at("1", "10.0.0.5", "a", Severity::Low, now),
            alert_at("2", "10.0.0.6", "b", Severity::Low, now),
        ];
        let report = report(&alerts, now);
        assert_eq!(report.filters.sources.len(), 2);
        assert_eq!(report.filters.protocols, vec!["HTTPS".to_string()]);
    }
}
