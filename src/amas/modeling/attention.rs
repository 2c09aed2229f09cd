use crate::amas::config::AttentionWeights;
use crate::amas::types::NEUTRAL_ATTENTION;

use super::features::FeatureSet;

/// The slice of the feature set attention reacts to.
#[derive(Debug, Clone)]
pub struct AttentionFeatures {
    pub rt_mean: f64,
    pub rt_cv: f64,
    pub pace_cv: f64,
    pub pause: f64,
    pub retry: f64,
    pub accuracy: f64,
    pub dwell: f64,
    pub hint_used: bool,
}

impl From<&FeatureSet> for AttentionFeatures {
    fn from(f: &FeatureSet) -> Self {
        Self {
            rt_mean: f.rt_mean,
            rt_cv: f.rt_cv,
            pace_cv: f.pace_cv,
            pause: f.pause_norm,
            retry: f.retry_norm,
            accuracy: f.recent_accuracy,
            dwell: f.dwell_norm,
            hint_used: f.hint_used,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttentionMonitor {
    weights: AttentionWeights,
    base_smoothing: f64,
    current_value: f64,
}

impl AttentionMonitor {
    pub fn new(weights: AttentionWeights, smoothing: f64) -> Self {
        Self {
            weights,
            base_smoothing: smoothing.clamp(0.0, 1.0),
            current_value: NEUTRAL_ATTENTION,
        }
    }

    pub fn update(&mut self, f: &AttentionFeatures) -> f64 {
        let w = &self.weights;

        // Lower is better for every signal except accuracy.
        let rt_score = 1.0 - f.rt_mean.clamp(0.0, 1.0);
        let cv_score = 1.0 - f.rt_cv.clamp(0.0, 1.0);
        let pace_score = 1.0 - f.pace_cv.clamp(0.0, 1.0);
        let pause_score = 1.0 - f.pause.clamp(0.0, 1.0);
        let retry_score = 1.0 - f.retry.clamp(0.0, 1.0);
        let accuracy_score = f.accuracy.clamp(0.0, 1.0);
        let hint_score = if f.hint_used { 0.3 } else { 1.0 };

        // U-shaped: best around 20% of the dwell ceiling.
        let dwell_distance = (f.dwell.clamp(0.0, 1.0) - 0.2).abs() * 2.5;
        let dwell_score = (1.0 - dwell_distance).max(0.0);

        let weighted = w.rt_mean * rt_score
            + w.rt_cv * cv_score
            + w.pace_cv * pace_score
            + w.pause * pause_score
            + w.retry * retry_score
            + w.accuracy * accuracy_score
            + w.dwell * dwell_score
            + w.hint * hint_score;
        let raw = weighted / w.total().max(1e-6);

        let volatility = (f.rt_cv + f.pace_cv) / 2.0;
        let alpha = (self.base_smoothing * (1.0 + 0.5 * volatility)).clamp(0.15, 0.7);

        let next = alpha * raw + (1.0 - alpha) * self.current_value;
        self.current_value = if next.is_finite() {
            next.clamp(0.0, 1.0)
        } else {
            self.current_value
        };
        self.current_value
    }

    pub fn current(&self) -> f64 {
        self.current_value
    }

    pub fn set_value(&mut self, value: f64) {
        if value.is_finite() {
            self.current_value = value.clamp(0.0, 1.0);
        }
    }
}

impl Default for AttentionMonitor {
    fn default() -> Self {
        Self::new(AttentionWeights::default(), 0.3)
    }
}
