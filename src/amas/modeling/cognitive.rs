use std::collections::VecDeque;

use crate::amas::config::CognitiveParams;
use crate::amas::types::CognitiveProfile;

#[derive(Debug, Clone)]
pub struct CognitiveInput {
    pub accuracy: f64,
    pub avg_response_time: f64,
}

/// EMA memory and speed; stability is one minus the scaled accuracy variance.
#[derive(Debug, Clone)]
pub struct CognitiveProfiler {
    params: CognitiveParams,
    profile: CognitiveProfile,
    accuracy_history: VecDeque<f64>,
}

impl CognitiveProfiler {
    pub fn new(params: CognitiveParams) -> Self {
        let capacity = params.stability_window.max(1);
        Self {
            params,
            profile: CognitiveProfile::default(),
            accuracy_history: VecDeque::with_capacity(capacity),
        }
    }

    pub fn update(&mut self, input: &CognitiveInput) -> CognitiveProfile {
        let alpha = self.params.memory_alpha.clamp(0.0, 1.0);
        let accuracy = if input.accuracy.is_finite() {
            input.accuracy.clamp(0.0, 1.0)
        } else {
            0.5
        };

        self.profile.mem = alpha * accuracy + (1.0 - alpha) * self.profile.mem;

        let baseline = self.params.speed_baseline_ms.max(1.0);
        let speed = 1.0 - (input.avg_response_time.max(0.0) / baseline / 3.0).min(1.0);
        self.profile.speed = alpha * speed + (1.0 - alpha) * self.profile.speed;

        self.accuracy_history.push_back(accuracy);
        while self.accuracy_history.len() > self.params.stability_window.max(1) {
            self.accuracy_history.pop_front();
        }

        let stability = if self.accuracy_history.len() >= 3 {
            1.0 - (variance(&self.accuracy_history) * 4.0).min(1.0)
        } else {
            0.5
        };
        self.profile.stability = alpha * stability + (1.0 - alpha) * self.profile.stability;

        self.profile.mem = self.profile.mem.clamp(0.0, 1.0);
        self.profile.speed = self.profile.speed.clamp(0.0, 1.0);
        self.profile.stability = self.profile.stability.clamp(0.0, 1.0);

        self.profile.clone()
    }

    pub fn current(&self) -> &CognitiveProfile {
        &self.profile
    }

    pub fn set_profile(&mut self, profile: &CognitiveProfile) {
        self.profile = CognitiveProfile {
            mem: profile.mem.clamp(0.0, 1.0),
            speed: profile.speed.clamp(0.0, 1.0),
            stability: profile.stability.clamp(0.0, 1.0),
        };
    }
}

impl Default for CognitiveProfiler {
    fn default() -> Self {
        Self::new(CognitiveParams::default())
    }
}

fn variance(values: &VecDeque<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accurate_fast_learner_improves_profile() {
        let mut profiler = CognitiveProfiler::default();
        for _ in 0..30 {
            profiler.update(&CognitiveInput {
                accuracy: 1.0,
                avg_response_time: 1000.0,
            });
        }
        let p = profiler.current();
        assert!(p.mem > 0.9);
        assert!(p.speed > 0.7);
        assert!(p.stability > 0.9);
    }

    #[test]
    fn erratic_accuracy_lowers_stability() {
        let mut profiler = CognitiveProfiler::default();
        for i in 0..30 {
            profiler.update(&CognitiveInput {
                accuracy: if i % 2 == 0 { 1.0 } else { 0.0 },
                avg_response_time: 3000.0,
            });
        }
        assert!(profiler.current().stability < 0.2);
    }
}
