//! Bounded alert history
//!
//! Single-writer ring buffer holding the most recent alerts. Readers copy
//! the snapshot before serializing, so the analyzer never contends with an
//! API request for long.

use std::collections::VecDeque;

use parking_lot::RwLock;

use crate::models::Alert;

pub struct AlertRing {
    inner: RwLock<VecDeque<Alert>>,
    capacity: usize,
}

impl AlertRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, alert: Alert) {
        let mut inner = self.inner.write();
        if inner.len() == self.capacity {
            inner.pop_front();
        }
        inner.push_back(alert);
    }

    /// Chronological snapshot (oldest first).
    pub fn snapshot(&self) -> Vec<Alert> {
        self.inner.read().iter().cloned().collect()
    }

    /// Newest-first snapshot for the API.
    pub fn snapshot_newest_first(&self) -> Vec<Alert> {
        let mut alerts = self.snapshot();
        alerts.reverse();
        alerts
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Append a probe annotation to an alert's description. The alert may
    /// have already rotated out of the ring; that is not an error.
    pub fn annotate(&self, alert_id: &str, annotation: &str) -> bool {
        let mut inner = self.inner.write();
        for alert in inner.iter_mut() {
            if alert.id == alert_id {
                alert.description.push_str(annotation);
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{KillchainStage, Protocol, Severity};
    use chrono::Utc;

    fn alert(id: &str) -> Alert {
        Alert {
            id: id.to_string(),
            timestamp: Utc::now(),
            severity: Severity::High,
            source: "10.0.0.5".to_string(),
            target: "api.openai.com".to_string(),
            protocol: Protocol::Https,
            destination_port: 443,
            source_port: 50000,
            destination_ip: "104.18.32.7".parse().unwrap(),
            bytes_sent: 100,
            bytes_received: 100,
            description: "test".to_string(),
            matched_rule: None,
            category: None,
            ml_classification: None,
            ml_confidence: 0.0,
            ml_risk_score: 0.0,
            killchain_stage: KillchainStage::Execution,
        }
    }

    #[test]
    fn ring_evicts_oldest_at_capacity() {
        let ring = AlertRing::new(3);
        for i in 0..5 {
            ring.push(alert(&format!("a{i}")));
        }
        let ids: Vec<String> = ring.snapshot().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["a2", "a3", "a4"]);
    }

    #[test]
    fn newest_first_reverses() {
        let ring = AlertRing::new(10);
        ring.push(alert("first"));
        ring.push(alert("second"));
        assert_eq!(ring.snapshot_newest_first()[0].id, "second");
    }

    #[test]
    fn annotate_appends_to_description() {
        let ring = AlertRing::new(10);
        ring.push(alert("x"));
        assert!(ring.annotate("x", " [Active probe: confirmed AI service]"));
        assert!(ring.snapshot()[0]
            .description
            .ends_with("[Active probe: confirmed AI service]"));
        assert!(!ring.annotate("missing", "y"));
    }
}
