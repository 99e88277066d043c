//! ML-flavored intelligence engine
//!
//! Augments the deterministic rules with three scoring primitives fused
//! into a single verdict per flow:
//!
//! - anomaly score from an online outlier detector,
//! - traffic classification with confidence,
//! - behavioral session score per source IP.
//!
//! Fusion is deterministic:
//! `risk = clamp(0, 100, 40*anomaly + 40*shadow_confidence + 20*session)`.
//! With no models loaded the engine returns a neutral verdict and the
//! orchestrator relies on rules alone.

pub mod anomaly;
pub mod classifier;
pub mod features;
pub mod session;

use std::net::IpAddr;
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::models::{FlowEvent, MlClass, Severity, Verdict};

pub use anomaly::AnomalyDetector;
pub use classifier::{ClassifierModel, TrafficClassifier};
pub use features::{FeatureExtractor, FeatureVector, FEATURE_NAMES, NUM_FEATURES};
pub use session::SessionTracker;

/// Minimum baseline samples before the anomaly scorer activates
const ANOMALY_MIN_SAMPLES: u64 = 200;

/// Real-time scoring engine. Model handles are immutable after load and
/// swapped atomically on reload; the session tracker is the only mutable
/// hot state.
pub struct IntelligenceEngine {
    extractor: FeatureExtractor,
    anomaly: RwLock<AnomalyDetector>,
    classifier: RwLock<TrafficClassifier>,
    sessions: Mutex<SessionTracker>,
    models_loaded: bool,
}

impl IntelligenceEngine {
    /// Cold engine: neutral verdicts until models are loaded.
    pub fn cold() -> Self {
        Self {
            extractor: FeatureExtractor,
            anomaly: RwLock::new(AnomalyDetector::new(ANOMALY_MIN_SAMPLES)),
            classifier: RwLock::new(TrafficClassifier::cold()),
            sessions: Mutex::new(SessionTracker::new()),
            models_loaded: false,
        }
    }

    /// Load serialized models from a directory (`anomaly.json`,
    /// `classifier.json`). Missing files leave the corresponding primitive
    /// cold; the engine counts as loaded when the classifier is present.
    pub fn load_from<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        let mut engine = Self::cold();

        match AnomalyDetector::load(dir.join("anomaly.json")) {
            Ok(det) => {
                *engine.anomaly.write() = det;
                info!("anomaly baseline loaded");
            }
            Err(err) => warn!(%err, "anomaly model unavailable, learning online"),
        }

        match TrafficClassifier::load(dir.join("classifier.json")) {
            Ok(clf) => {
                *engine.classifier.write() = clf;
                engine.models_loaded = true;
                info!("traffic classifier loaded");
            }
            Err(err) => warn!(%err, "classifier unavailable, rules-only detection"),
        }

        engine
    }

    /// Engine with explicit models, used by tests and scenario tooling.
    pub fn with_models(anomaly: AnomalyDetector, classifier: TrafficClassifier) -> Self {
        let models_loaded = classifier.is_loaded();
        Self {
            extractor: FeatureExtractor,
            anomaly: RwLock::new(anomaly),
            classifier: RwLock::new(classifier),
            sessions: Mutex::new(SessionTracker::new()),
            models_loaded,
        }
    }

    pub fn models_loaded(&self) -> bool {
        self.models_loaded
    }

    /// Score one flow. Always records the session observation; returns a
    /// neutral verdict while no models are loaded.
    pub fn analyze(&self, event: &FlowEvent, alert_severity: Option<Severity>) -> Verdict {
        let target = event.destination_name();
        {
            let mut sessions = self.sessions.lock();
            sessions.record(
                event.source_ip,
                &target,
                event.bytes_sent,
                alert_severity,
                event.timestamp,
            );
        }

        let features = self.extractor.extract(event);

        // Baseline keeps learning even before models are loaded so a later
        // reload starts warm.
        let anomaly = {
            let mut detector = self.anomaly.write();
            detector.observe(&features);
            detector.score(&features)
        };

        if !self.models_loaded {
            return Verdict::neutral();
        }

        let (classification, confidence) = self.classifier.read().predict(&features);
        let session = self.session_score(&event.source_ip, event.timestamp);

        let shadow_component = if classification == MlClass::ShadowAi {
            confidence
        } else {
            0.0
        };
        let risk =
            (40.0 * anomaly + 40.0 * shadow_component + 20.0 * session).clamp(0.0, 100.0);

        Verdict {
            classification,
            confidence,
            anomaly,
            risk,
        }
    }

    pub fn session_score(&self, source: &IpAddr, now: DateTime<Utc>) -> f64 {
        self.sessions.lock().score(source, now)
    }

    /// Evict idle sessions; called periodically by the analyzer.
    pub fn evict_stale_sessions(&self, now: DateTime<Utc>) {
        self.sessions.lock().evict_stale(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::classifier::ClassCentroid;
    use crate::models::Protocol;
    use chrono::Utc;
    use std::collections::HashMap;

    fn event(bytes_sent: u64, sni: &str) -> FlowEvent {
        let mut metadata = HashMap::new();
        metadata.insert("sni".to_string(), sni.to_string());
        FlowEvent {
            timestamp: Utc::now(),
            source_ip: "10.0.0.5".parse().unwrap(),
            destination_ip: "198.51.100.9".parse().unwrap(),
            source_port: 52000,
            destination_port: 443,
            protocol: Protocol::Https,
            bytes_sent,
            bytes_received: bytes_sent / 2,
            ja3_hash: None,
            metadata,
        }
    }

    fn shadow_biased_classifier() -> TrafficClassifier {
        // Centroids built so large flows toward high-rank TLDs land on the
        // shadow_ai side.
        let extractor = FeatureExtractor;
        let shadow = extractor.extract(&event(50_000, "api.openai.com"));
        let normal = extractor.extract(&event(500, "example.com"));
        TrafficClassifier::with_model(ClassifierModel {
            classes: vec![
                ClassCentroid {
                    class: MlClass::Normal,
                    centroid: normal.to_vec(),
                },
                ClassCentroid {
                    class: MlClass::ShadowAi,
                    centroid: shadow.to_vec(),
                },
            ],
        })
    }

    #[test]
    fn cold_engine_returns_neutral_verdict() {
        let engine = IntelligenceEngine::cold();
        let verdict = engine.analyze(&event(100_000, "api.openai.com"), None);
        assert_eq!(verdict.classification, MlClass::Normal);
        assert_eq!(verdict.risk, 0.0);
        assert_eq!(verdict.confidence, 0.0);
        assert_eq!(verdict.anomaly, 0.0);
    }

    #[test]
    fn loaded_engine_flags_shadow_traffic() {
        let engine = IntelligenceEngine::with_models(
            AnomalyDetector::new(ANOMALY_MIN_SAMPLES),
            shadow_biased_classifier(),
        );
        let verdict = engine.analyze(&event(60_000, "api.openai.com"), None);
        assert_eq!(verdict.classification, MlClass::ShadowAi);
        assert!(verdict.confidence > 0.5);
        assert!(verdict.risk > 0.0);
        assert!(verdict.risk <= 100.0);
    }

    #[test]
    fn fusion_risk_is_bounded() {
        let engine = IntelligenceEngine::with_models(
            AnomalyDetector::new(1),
            shadow_biased_classifier(),
        );
        for _ in 0..50 {
            let verdict = engine.analyze(&event(80_000, "api.openai.com"), Some(Severity::High));
            assert!(verdict.risk <= 100.0);
            assert!(verdict.risk >= 0.0);
        }
    }
}
