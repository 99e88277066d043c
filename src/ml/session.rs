//! Per-source behavioral session tracking
//!
//! Rolling state per source IP: outbound volume, target fan-out and recent
//! high-severity hits, decayed exponentially with a 10-minute half-life.
//! Sessions idle for more than 30 minutes are evicted.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use chrono::{DateTime, Duration, Utc};

use crate::models::Severity;

/// Decay half-life for accumulated activity
const HALF_LIFE_SECS: f64 = 600.0;

/// Idle period after which a session is dropped
const EVICT_AFTER_SECS: i64 = 1800;

// Saturation points for the three score components.
const VOLUME_SATURATION_BYTES: f64 = 5_000_000.0;
const FANOUT_SATURATION: f64 = 8.0;
const ALERT_SATURATION: f64 = 3.0;

#[derive(Debug, Clone)]
struct SessionState {
    bytes_out: f64,
    targets: HashSet<String>,
    alert_weight: f64,
    alert_count: u64,
    last_activity: DateTime<Utc>,
}

impl SessionState {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            bytes_out: 0.0,
            targets: HashSet::new(),
            alert_weight: 0.0,
            alert_count: 0,
            last_activity: now,
        }
    }

    fn decay_to(&mut self, now: DateTime<Utc>) {
        let elapsed = (now - self.last_activity).num_milliseconds() as f64 / 1000.0;
        if elapsed <= 0.0 {
            return;
        }
        let factor = 0.5_f64.powf(elapsed / HALF_LIFE_SECS);
        self.bytes_out *= factor;
        self.alert_weight *= factor;
    }
}

/// Behavioral tracker over all active sources.
pub struct SessionTracker {
    sessions: HashMap<IpAddr, SessionState>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    /// Record one flow for a source. `alert_severity` is the severity of
    /// any alert raised on the same flow.
    pub fn record(
        &mut self,
        source: IpAddr,
        target: &str,
        bytes_out: u64,
        alert_severity: Option<Severity>,
        now: DateTime<Utc>,
    ) {
        let state = self
            .sessions
            .entry(source)
            .or_insert_with(|| SessionState::new(now));
        state.decay_to(now);

        state.bytes_out += bytes_out as f64;
        state.targets.insert(target.to_string());
        if let Some(severity) = alert_severity {
            state.alert_count += 1;
            state.alert_weight += match severity {
                Severity::High => 1.0,
                Severity::Medium => 0.4,
                Severity::Low => 0.15,
            };
        }
        if now > state.last_activity {
            state.last_activity = now;
        }
    }

    /// Session score in [0, 1] for the fusion formula. Grows with
    /// sustained outbound volume, fan-out and recent severe hits.
    pub fn score(&self, source: &IpAddr, now: DateTime<Utc>) -> f64 {
        let Some(state) = self.sessions.get(source) else {
            return 0.0;
        };

        let elapsed = (now - state.last_activity).num_milliseconds() as f64 / 1000.0;
        let factor = if elapsed > 0.0 {
            0.5_f64.powf(elapsed / HALF_LIFE_SECS)
        } else {
            1.0
        };

        let volume = ((state.bytes_out * factor) / VOLUME_SATURATION_BYTES).min(1.0);
        let fanout = (state.targets.len() as f64 / FANOUT_SATURATION).min(1.0);
        let alerts = ((state.alert_weight * factor) / ALERT_SATURATION).min(1.0);

        (0.4 * volume + 0.3 * fanout + 0.3 * alerts).clamp(0.0, 1.0)
    }

    pub fn alert_count(&self, source: &IpAddr) -> u64 {
        self.sessions.get(source).map(|s| s.alert_count).unwrap_or(0)
    }

    /// Drop sessions idle beyond the eviction window.
    pub fn evict_stale(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::seconds(EVICT_AFTER_SECS);
        self.sessions.retain(|_, s| s.last_activity > cutoff);
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        format!("10.0.0.{last}").parse().unwrap()
    }

    #[test]
    fn score_grows_with_volume_and_alerts() {
        let mut tracker = SessionTracker::new();
        let now = Utc::now();

        tracker.record(ip(1), "api.openai.com", 10_000, None, now);
        let quiet = tracker.score(&ip(1), now);

        tracker.record(ip(1), "claude.ai", 2_000_000, Some(Severity::High), now);
        tracker.record(ip(1), "huggingface.co", 2_000_000, Some(Severity::High), now);
        let loud = tracker.score(&ip(1), now);

        assert!(loud > quiet);
        assert!(loud <= 1.0);
    }

    #[test]
    fn score_decays_with_half_life() {
        let mut tracker = SessionTracker::new();
        let start = Utc::now();
        tracker.record(ip(2), "api.openai.com", 5_000_000, Some(Severity::High), start);

        let fresh = tracker.score(&ip(2), start);
        let later = tracker.score(&ip(2), start + Duration::minutes(20));
        assert!(later < fresh);
    }

    #[test]
    fn stale_sessions_are_evicted() {
        let mut tracker = SessionTracker::new();
        let start = Utc::now();
        tracker.record(ip(3), "example.com", 100, None, start);
        assert_eq!(tracker.active_sessions(), 1);

        tracker.evict_stale(start + Duration::minutes(31));
        assert_eq!(tracker.active_sessions(), 0);
        assert_eq!(tracker.score(&ip(3), start + Duration::minutes(31)), 0.0);
    }

    #[test]
    fn unknown_source_scores_zero() {
        let tracker = SessionTracker::new();
        assert_eq!(tracker.score(&ip(9), Utc::now()), 0.0);
    }
}
