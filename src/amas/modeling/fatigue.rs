use crate::amas::config::FatigueParams;
use crate::amas::types::NEUTRAL_FATIGUE;

use super::features::FeatureSet;

#[derive(Debug, Clone, Default)]
pub struct FatigueFeatures {
    pub error_rate_trend: f64,
    pub rt_increase_rate: f64,
    pub repeat_errors: i32,
    pub break_minutes: Option<f64>,
}

impl From<&FeatureSet> for FatigueFeatures {
    fn from(f: &FeatureSet) -> Self {
        Self {
            error_rate_trend: f.error_rate_trend,
            rt_increase_rate: f.rt_increase_rate,
            repeat_errors: f.repeat_errors,
            break_minutes: f.break_minutes,
        }
    }
}

/// `F' = F·e^(−k) + β·Δerr + γ·Δrt + δ·repeats/5`, reset after a long break.
#[derive(Debug, Clone)]
pub struct FatigueEstimator {
    params: FatigueParams,
    current_value: f64,
}

impl FatigueEstimator {
    pub fn new(params: FatigueParams) -> Self {
        Self {
            params,
            current_value: NEUTRAL_FATIGUE,
        }
    }

    pub fn update(&mut self, features: &FatigueFeatures) -> f64 {
        if let Some(break_min) = features.break_minutes {
            if break_min >= self.params.long_break_threshold {
                self.current_value = NEUTRAL_FATIGUE;
                return self.current_value;
            }
        }

        let error_component = self.params.beta * finite_or_zero(features.error_rate_trend).max(0.0);
        let rt_component = self.params.gamma * finite_or_zero(features.rt_increase_rate).max(0.0);
        let repeat_component =
            self.params.delta * (features.repeat_errors.max(0) as f64 / 5.0).min(1.0);

        let decay = (-self.params.k).exp();
        self.current_value = (self.current_value * decay
            + error_component
            + rt_component
            + repeat_component)
            .clamp(0.0, 1.0);
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

impl Default for FatigueEstimator {
    fn default() -> Self {
        Self::new(FatigueParams::default())
    }
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_and_slowdown_accumulate_fatigue() {
        let mut estimator = FatigueEstimator::default();
        let features = FatigueFeatures {
            error_rate_trend: 0.5,
            rt_increase_rate: 0.5,
            repeat_errors: 3,
            break_minutes: Some(0.2),
        };
        let first = estimator.update(&features);
        let second = estimator.update(&features);
        assert!(first > 0.0);
        assert!(second > first);
        assert!(second <= 1.0);
    }

    #[test]
    fn calm_events_let_fatigue_decay() {
        let mut estimator = FatigueEstimator::default();
        estimator.set_value(0.6);
        let after = estimator.update(&FatigueFeatures::default());
        assert!(after < 0.6);
    }

    #[test]
    fn long_break_resets() {
        let mut estimator = FatigueEstimator::default();
        estimator.set_value(0.9);
        let after = estimator.update(&FatigueFeatures {
            break_minutes: Some(45.0),
            ..Default::default()
        });
        assert_eq!(after, 0.0);
    }
}
