//! Traffic classification
//!
//! Nearest-centroid classifier over the flow feature vector. The model file
//! is produced offline; this module only implements the inference contract.
//! Without a loaded model every prediction is `normal` with zero
//! confidence, leaving the event to the deterministic rules.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::features::{FeatureVector, NUM_FEATURES};
use crate::models::MlClass;

/// Serialized model: one centroid per class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierModel {
    pub classes: Vec<ClassCentroid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassCentroid {
    pub class: MlClass,
    pub centroid: Vec<f64>,
}

/// Inference wrapper around an optional trained model.
pub struct TrafficClassifier {
    model: Option<ClassifierModel>,
}

impl TrafficClassifier {
    pub fn cold() -> Self {
        Self { model: None }
    }

    pub fn with_model(model: ClassifierModel) -> Self {
        Self { model: Some(model) }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let model: ClassifierModel =
            serde_json::from_str(&content).map_err(std::io::Error::other)?;
        Ok(Self::with_model(model))
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Predict the class of a flow with a confidence in [0, 1].
    ///
    /// Confidence is the relative margin between the nearest and the
    /// second-nearest centroid; a lone-class model gets full confidence.
    pub fn predict(&self, v: &FeatureVector) -> (MlClass, f64) {
        let Some(model) = &self.model else {
            return (MlClass::Normal, 0.0);
        };
        if model.classes.is_empty() {
            return (MlClass::Normal, 0.0);
        }

        let mut distances: Vec<(MlClass, f64)> = model
            .classes
            .iter()
            .map(|c| (c.class, euclidean(v, &c.centroid)))
            .collect();
        distances.sort_by(|a, b| a.1.total_cmp(&b.1));

        let (best_class, best_dist) = distances[0];
        if distances.len() == 1 {
            return (best_class, 1.0);
        }

        let second_dist = distances[1].1;
        let confidence = if best_dist + second_dist < 1e-12 {
            0.5
        } else {
            (second_dist - best_dist) / (second_dist + best_dist)
        };
        (best_class, confidence.clamp(0.0, 1.0))
    }
}

fn euclidean(v: &FeatureVector, centroid: &[f64]) -> f64 {
    v.iter()
        .zip(centroid.iter().chain(std::iter::repeat(&0.0)))
        .take(NUM_FEATURES)
        .map(|(a, b)| (a - b) * (a - b))
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> ClassifierModel {
        let mut normal = vec![0.0; NUM_FEATURES];
        normal[1] = 2.0;
        let mut shadow = vec![0.0; NUM_FEATURES];
        shadow[1] = 10.0;
        shadow[5] = 0.8;

        ClassifierModel {
            classes: vec![
                ClassCentroid {
                    class: MlClass::Normal,
                    centroid: normal,
                },
                ClassCentroid {
                    class: MlClass::ShadowAi,
                    centroid: shadow,
                },
            ],
        }
    }

    #[test]
    fn cold_start_returns_neutral() {
        let clf = TrafficClassifier::cold();
        let (class, confidence) = clf.predict(&[1.0; NUM_FEATURES]);
        assert_eq!(class, MlClass::Normal);
        assert_eq!(confidence, 0.0);
    }

    #[test]
    fn predicts_nearest_centroid() {
        let clf = TrafficClassifier::with_model(model());

        let mut near_shadow = [0.0; NUM_FEATURES];
        near_shadow[1] = 9.5;
        near_shadow[5] = 0.8;
        let (class, confidence) = clf.predict(&near_shadow);
        assert_eq!(class, MlClass::ShadowAi);
        assert!(confidence > 0.5, "confidence was {confidence}");

        let mut near_normal = [0.0; NUM_FEATURES];
        near_normal[1] = 2.1;
        let (class, _) = clf.predict(&near_normal);
        assert_eq!(class, MlClass::Normal);
    }

    #[test]
    fn model_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classifier.json");
        std::fs::write(&path, serde_json::to_string(&model()).unwrap()).unwrap();

        let clf = TrafficClassifier::load(&path).unwrap();
        assert!(clf.is_loaded());
    }
}
