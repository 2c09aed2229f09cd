use crate::amas::config::{AMASConfig, DecayConfig};
use crate::amas::types::{
    RawEvent, UserState, NEUTRAL_ATTENTION, NEUTRAL_FATIGUE, NEUTRAL_MOTIVATION,
};

use super::attention::{AttentionFeatures, AttentionMonitor};
use super::cognitive::{CognitiveInput, CognitiveProfiler};
use super::fatigue::{FatigueEstimator, FatigueFeatures};
use super::features::FeatureSet;
use super::motivation::{MotivationEvent, MotivationTracker};
use super::trend::TrendAnalyzer;

const MS_PER_MINUTE: f64 = 60_000.0;
const MS_PER_DAY: f64 = 86_400_000.0;

/// The per-user sub-models behind a [`UserState`].
#[derive(Debug, Clone)]
pub struct SubModels {
    pub attention: AttentionMonitor,
    pub fatigue: FatigueEstimator,
    pub cognitive: CognitiveProfiler,
    pub motivation: MotivationTracker,
    pub trend: TrendAnalyzer,
}

impl SubModels {
    pub fn new(config: &AMASConfig) -> Self {
        Self {
            attention: AttentionMonitor::new(
                config.attention_weights.clone(),
                config.attention_smoothing,
            ),
            fatigue: FatigueEstimator::new(config.fatigue.clone()),
            cognitive: CognitiveProfiler::new(config.cognitive.clone()),
            motivation: MotivationTracker::new(config.motivation.clone()),
            trend: TrendAnalyzer::new(config.trend.clone()),
        }
    }

    /// Points every sub-model at the given state, which is authoritative.
    fn sync_from(&mut self, state: &UserState) {
        self.attention.set_value(state.attention);
        self.fatigue.set_value(state.fatigue);
        self.cognitive.set_profile(&state.cognitive);
        self.motivation.set_value(state.motivation);
        self.trend.set_current(state.trend);
    }
}

#[derive(Debug, Clone)]
pub struct StateEstimator {
    confidence_step: f64,
}

impl StateEstimator {
    pub fn new(config: &AMASConfig) -> Self {
        Self {
            confidence_step: config.confidence_step.max(0.0),
        }
    }

    /// Pure: neither `prev` nor `sub_models` is touched; the updated copies are returned.
    pub fn estimate(
        &self,
        prev: &UserState,
        features: &FeatureSet,
        event: &RawEvent,
        recent_error_rate: f64,
        sub_models: &SubModels,
    ) -> (UserState, SubModels) {
        let mut models = sub_models.clone();
        models.sync_from(prev);

        let attention = models.attention.update(&AttentionFeatures::from(features));
        let fatigue = models.fatigue.update(&FatigueFeatures::from(features));

        let error_rate = if recent_error_rate.is_finite() {
            recent_error_rate.clamp(0.0, 1.0)
        } else {
            1.0 - features.recent_accuracy
        };
        let cognitive = models.cognitive.update(&CognitiveInput {
            accuracy: 1.0 - error_rate,
            avg_response_time: features.avg_response_time,
        });

        let motivation = models.motivation.update(MotivationEvent {
            is_correct: event.is_correct,
            is_quit: event.is_quit,
        });
        let trend = models.trend.update(cognitive.composite());

        let state = UserState {
            attention,
            fatigue,
            cognitive,
            motivation,
            trend,
            conf: (prev.conf + self.confidence_step).clamp(0.0, 1.0).max(prev.conf.min(1.0)),
            ts: event.timestamp,
            cold_start: prev.cold_start.clone(),
        };
        (state, models)
    }
}

/// Ages a restored state by the time elapsed since it was last written.
pub fn apply_decay(state: &UserState, now_ms: i64, config: &DecayConfig) -> UserState {
    let mut next = state.clone();
    let elapsed_ms = now_ms - state.ts;
    if elapsed_ms <= 0 {
        return next;
    }

    let days = elapsed_ms as f64 / MS_PER_DAY;
    let minutes = elapsed_ms as f64 / MS_PER_MINUTE;

    if days >= 1.0 {
        let pull = 1.0 - (-config.offline_drift_rate.max(0.0) * days).exp();
        next.attention += (NEUTRAL_ATTENTION - next.attention) * pull;
        next.fatigue += (NEUTRAL_FATIGUE - next.fatigue) * pull;
        next.motivation += (NEUTRAL_MOTIVATION - next.motivation) * pull;
        next.conf = (next.conf * config.offline_confidence_decay.clamp(0.0, 1.0).powf(days))
            .max(config.min_confidence);
    }

    if minutes >= config.session_reset_minutes {
        next.fatigue = NEUTRAL_FATIGUE;
        next.attention = NEUTRAL_ATTENTION;
    } else if minutes >= config.short_break_minutes {
        next.fatigue *= (-config.fatigue_decay_per_minute.max(0.0) * minutes).exp();
    }

    next.attention = next.attention.clamp(0.0, 1.0);
    next.fatigue = next.fatigue.clamp(0.0, 1.0);
    next.motivation = next.motivation.clamp(-1.0, 1.0);
    next.conf = next.conf.clamp(0.0, 1.0);
    next
}
