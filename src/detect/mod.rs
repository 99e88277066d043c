//! Rule-based detection engine
//!
//! A registry of [`Detector`] implementations evaluated against every flow.
//! Detection is stateless: the context carries snapshots of the intel
//! tables and the enabled policy rules. All detectors run and hits
//! accumulate; a panicking detector is contained and skipped.

mod rules;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::warn;

use crate::config::EngineContext;
use crate::models::{is_multicast_or_broadcast, FlowEvent, PolicyRule, Severity};

pub use rules::{
    AbnormalPortDetector, AiDomainDetector, CidrIntelDetector, DnsTunnelDetector,
    ExfiltrationDetector, Ja3Detector, PolicyRuleDetector,
};

/// One detector hit for a flow
#[derive(Debug, Clone)]
pub struct RuleHit {
    pub severity: Severity,
    pub category: Option<String>,
    pub matched_rule: String,
    pub description: String,
    /// Set when a policy rule with `action = block` matched
    pub block_requested: bool,
}

impl RuleHit {
    pub fn new(severity: Severity, matched_rule: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            severity,
            category: None,
            matched_rule: matched_rule.into(),
            description: description.into(),
            block_requested: false,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// Snapshot context handed to every detector for one event.
pub struct DetectContext<'a> {
    pub engine: &'a EngineContext,
    /// Enabled+disabled policy rules; detectors filter on `enabled`.
    pub rules: Arc<Vec<PolicyRule>>,
    /// Display label chosen for the destination node
    pub destination_label: &'a str,
    /// Department of the source endpoint, if assigned
    pub source_department: Option<&'a str>,
}

/// A single detection rule family.
pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;
    fn detect(&self, event: &FlowEvent, ctx: &DetectContext<'_>) -> Vec<RuleHit>;
}

/// Registry of all active detectors, evaluated in a fixed order.
pub struct DetectorRegistry {
    detectors: Vec<Box<dyn Detector>>,
}

impl DetectorRegistry {
    /// Registry with the built-in rule set in evaluation order.
    pub fn with_defaults() -> Self {
        Self {
            detectors: vec![
                Box::new(AiDomainDetector),
                Box::new(CidrIntelDetector),
                Box::new(Ja3Detector),
                Box::new(AbnormalPortDetector),
                Box::new(DnsTunnelDetector),
                Box::new(ExfiltrationDetector),
                Box::new(PolicyRuleDetector),
            ],
        }
    }

    /// Register an additional detector.
    pub fn register(&mut self, detector: Box<dyn Detector>) {
        self.detectors.push(detector);
    }

    /// Known-safe traffic suppressed before any detector runs: multicast,
    /// broadcast and SSDP destinations, and east-west internal traffic
    /// unless an endpoint is a flagged internal service.
    pub fn is_whitelisted(&self, event: &FlowEvent, ctx: &DetectContext<'_>) -> bool {
        if is_multicast_or_broadcast(&event.destination_ip) {
            return true;
        }

        let src_internal = ctx.engine.is_internal(&event.source_ip);
        let dst_internal = ctx.engine.is_internal(&event.destination_ip);
        if src_internal
            && dst_internal
            && !ctx.engine.is_interesting_internal(&event.source_ip)
            && !ctx.engine.is_interesting_internal(&event.destination_ip)
        {
            return true;
        }

        false
    }

    /// Run every detector against the event and accumulate hits. A panic
    /// inside one detector skips only that detector's hits.
    pub fn run(&self, event: &FlowEvent, ctx: &DetectContext<'_>) -> Vec<RuleHit> {
        if self.is_whitelisted(event, ctx) {
            return Vec::new();
        }

        let mut hits = Vec::new();
        for detector in &self.detectors {
            match catch_unwind(AssertUnwindSafe(|| detector.detect(event, ctx))) {
                Ok(mut detector_hits) => hits.append(&mut detector_hits),
                Err(_) => {
                    ctx.engine.stats.detector_panics.fetch_add(1, Ordering::Relaxed);
                    warn!(detector = detector.name(), "detector panicked; skipping");
                }
            }
        }
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::Protocol;
    use chrono::Utc;
    use std::collections::HashMap;

    fn event(src: &str, dst: &str, dport: u16, protocol: Protocol) -> FlowEvent {
        FlowEvent {
            timestamp: Utc::now(),
            source_ip: src.parse().unwrap(),
            destination_ip: dst.parse().unwrap(),
            source_port: 50000,
            destination_port: dport,
            protocol,
            bytes_sent: 512,
            bytes_received: 1024,
            ja3_hash: None,
            metadata: HashMap::new(),
        }
    }

    struct PanickingDetector;

    impl Detector for PanickingDetector {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn detect(&self, _event: &FlowEvent, _ctx: &DetectContext<'_>) -> Vec<RuleHit> {
            panic!("detector bug");
        }
    }

    #[test]
    fn multicast_destination_is_whitelisted() {
        let ctx_arc = EngineContext::new(Config::default()).unwrap();
        let rules = ctx_arc.policy.snapshot();
        let ctx = DetectContext {
            engine: &ctx_arc,
            rules,
            destination_label: "239.255.255.250",
            source_department: None,
        };
        let registry = DetectorRegistry::with_defaults();
        let e = event("192.168.1.20", "239.255.255.250", 1900, Protocol::Udp);
        assert!(registry.is_whitelisted(&e, &ctx));
        assert!(registry.run(&e, &ctx).is_empty());
    }

    #[test]
    fn internal_to_internal_is_whitelisted_unless_interesting() {
        let mut config = Config::default();
        config.general.interesting_internal = vec!["192.168.1.200".parse().unwrap()];
        let ctx_arc = EngineContext::new(config).unwrap();
        let rules = ctx_arc.policy.snapshot();
        let ctx = DetectContext {
            engine: &ctx_arc,
            rules,
            destination_label: "192.168.1.100",
            source_department: None,
        };
        let registry = DetectorRegistry::with_defaults();

        let boring = event("192.168.1.20", "192.168.1.100", 445, Protocol::Tcp);
        assert!(registry.is_whitelisted(&boring, &ctx));

        let interesting = event("192.168.1.20", "192.168.1.200", 5432, Protocol::Tcp);
        assert!(!registry.is_whitelisted(&interesting, &ctx));
    }

    #[test]
    fn panicking_detector_is_contained() {
        let ctx_arc = EngineContext::new(Config::default()).unwrap();
        let rules = ctx_arc.policy.snapshot();
        let ctx = DetectContext {
            engine: &ctx_arc,
            rules,
            destination_label: "203.0.113.5",
            source_department: None,
        };
        let mut registry = DetectorRegistry::with_defaults();
        registry.register(Box::new(PanickingDetector));

        // Abnormal port should still fire even though another detector dies.
        let e = event("192.168.1.20", "203.0.113.5", 6667, Protocol::Tcp);
        let hits = registry.run(&e, &ctx);
        assert!(hits.iter().any(|h| h.matched_rule == "abnormal_outbound_port"));
        assert_eq!(
            ctx_arc.stats.detector_panics.load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }
}
