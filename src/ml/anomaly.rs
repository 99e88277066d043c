//! Isolation-style outlier scoring
//!
//! Maintains an online per-feature baseline (Welford mean/variance) and
//! scores each flow by its average clamped z-distance from that baseline.
//! Until enough samples are observed the detector stays silent, which gives
//! the cold-start behavior the intelligence engine requires.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::features::{FeatureVector, NUM_FEATURES};

/// Z-distance at which a single feature saturates the score
const Z_SATURATION: f64 = 4.0;

/// Per-feature running statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Baseline {
    pub count: u64,
    mean: Vec<f64>,
    m2: Vec<f64>,
}

impl Baseline {
    pub fn new() -> Self {
        Self {
            count: 0,
            mean: vec![0.0; NUM_FEATURES],
            m2: vec![0.0; NUM_FEATURES],
        }
    }

    pub fn update(&mut self, v: &FeatureVector) {
        self.count += 1;
        let n = self.count as f64;
        for i in 0..NUM_FEATURES {
            let delta = v[i] - self.mean[i];
            self.mean[i] += delta / n;
            self.m2[i] += delta * (v[i] - self.mean[i]);
        }
    }

    fn std_dev(&self, i: usize) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        (self.m2[i] / (self.count - 1) as f64).sqrt()
    }
}

impl Default for Baseline {
    fn default() -> Self {
        Self::new()
    }
}

/// Outlier detector over the learned baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyDetector {
    baseline: Baseline,
    /// Samples required before scoring activates
    pub min_samples: u64,
}

impl AnomalyDetector {
    pub fn new(min_samples: u64) -> Self {
        Self {
            baseline: Baseline::new(),
            min_samples,
        }
    }

    /// Fold a flow into the baseline.
    pub fn observe(&mut self, v: &FeatureVector) {
        self.baseline.update(v);
    }

    pub fn is_trained(&self) -> bool {
        self.baseline.count >= self.min_samples
    }

    /// Score in [0, 1]; 0 while the baseline is still warming up.
    pub fn score(&self, v: &FeatureVector) -> f64 {
        if !self.is_trained() {
            return 0.0;
        }

        let mut total = 0.0;
        let mut counted = 0usize;
        for i in 0..NUM_FEATURES {
            let std = self.baseline.std_dev(i);
            if std < 1e-9 {
                // A constant feature that suddenly moves is maximally odd.
                if (v[i] - self.baseline.mean[i]).abs() > 1e-9 {
                    total += 1.0;
                    counted += 1;
                }
                continue;
            }
            let z = (v[i] - self.baseline.mean[i]).abs() / std;
            total += (z / Z_SATURATION).min(1.0);
            counted += 1;
        }

        if counted == 0 {
            0.0
        } else {
            total / counted as f64
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(std::io::Error::other)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let content = serde_json::to_string(self).map_err(std::io::Error::other)?;
        std::fs::write(path, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(value: f64) -> FeatureVector {
        [value; NUM_FEATURES]
    }

    #[test]
    fn silent_until_trained() {
        let mut det = AnomalyDetector::new(10);
        for _ in 0..5 {
            det.observe(&uniform(1.0));
        }
        assert!(!det.is_trained());
        assert_eq!(det.score(&uniform(100.0)), 0.0);
    }

    #[test]
    fn outliers_score_higher_than_inliers() {
        let mut det = AnomalyDetector::new(10);
        for i in 0..200 {
            let jitter = (i % 7) as f64 * 0.01;
            det.observe(&uniform(1.0 + jitter));
        }

        let inlier = det.score(&uniform(1.02));
        let outlier = det.score(&uniform(9.0));
        assert!(outlier > inlier);
        assert!(outlier <= 1.0);
        assert!(inlier >= 0.0);
    }

    #[test]
    fn save_load_round_trip() {
        let mut det = AnomalyDetector::new(5);
        for i in 0..50 {
            det.observe(&uniform(i as f64 * 0.1));
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anomaly.json");
        det.save(&path).unwrap();

        let loaded = AnomalyDetector::load(&path).unwrap();
        assert!(loaded.is_trained());
        let probe = uniform(3.3);
        assert!((loaded.score(&probe) - det.score(&probe)).abs() < 1e-12);
    }
}
