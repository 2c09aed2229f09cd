use crate::amas::types::{DifficultyLevel, StrategyParams, UserState};

/// Rule-based baseline that nudges the current strategy toward what the
/// learner's state suggests. Never learns; always available.
#[derive(Debug, Clone)]
pub struct HeuristicLearner {
    fatigue_threshold: f64,
    attention_threshold: f64,
    motivation_threshold: f64,
}

impl HeuristicLearner {
    pub fn new(fatigue_threshold: f64, attention_threshold: f64, motivation_threshold: f64) -> Self {
        Self {
            fatigue_threshold,
            attention_threshold,
            motivation_threshold,
        }
    }

    pub fn suggest(&self, state: &UserState, current: &StrategyParams) -> StrategyParams {
        let mut next = current.clone();

        if state.fatigue > self.fatigue_threshold {
            next.batch_size = (next.batch_size - 3).max(5);
            next.new_ratio = (next.new_ratio - 0.1).max(0.1);
            if next.difficulty == DifficultyLevel::Hard {
                next.difficulty = DifficultyLevel::Mid;
            }
        }

        if state.attention < self.attention_threshold {
            next.hint_level = (next.hint_level + 1).min(2);
            next.batch_size = (next.batch_size - 1).max(5);
        }

        if state.motivation < self.motivation_threshold {
            next.difficulty = next.difficulty.easier();
            next.interval_scale = (next.interval_scale * 1.1).min(1.5);
        }

        let engaged = state.motivation > 0.5 && state.fatigue < 0.3 && state.attention > 0.7;
        if engaged {
            next.batch_size = (next.batch_size + 4).min(16);
            next.new_ratio = (next.new_ratio + 0.1).min(0.4);
            if next.difficulty == DifficultyLevel::Easy {
                next.difficulty = DifficultyLevel::Mid;
            }
        }

        if state.cognitive.mem > 0.8 && state.cognitive.speed > 0.7 {
            next.interval_scale = (next.interval_scale * 0.9).max(0.5);
        } else if state.cognitive.mem < 0.4 {
            next.interval_scale = (next.interval_scale * 1.2).min(1.5);
            next.hint_level = (next.hint_level + 1).min(2);
        }

        next
    }

    /// Lower when the learner is in a state the rules handle poorly.
    pub fn confidence(&self, state: &UserState) -> f64 {
        let mut confidence: f64 = 1.0;
        if state.fatigue > self.fatigue_threshold {
            confidence *= 0.8;
        }
        if state.attention < self.attention_threshold {
            confidence *= 0.8;
        }
        if state.motivation < self.motivation_threshold {
            confidence *= 0.8;
        }
        confidence.max(0.3)
    }
}

impl Default for HeuristicLearner {
    fn default() -> Self {
        Self::new(0.7, 0.4, -0.3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tired_learner_gets_smaller_easier_batches() {
        let learner = HeuristicLearner::default();
        let mut state = UserState::new_at(0);
        state.fatigue = 0.8;
        let current = StrategyParams {
            difficulty: DifficultyLevel::Hard,
            batch_size: 12,
            ..Default::default()
        };
        let next = learner.suggest(&state, &current);
        assert_eq!(next.difficulty, DifficultyLevel::Mid);
        assert!(next.batch_size < 12);
        assert!(learner.confidence(&state) < 1.0);
    }

    #[test]
    fn engaged_learner_gets_more_material() {
        let learner = HeuristicLearner::default();
        let mut state = UserState::new_at(0);
        state.motivation = 0.8;
        state.attention = 0.9;
        state.fatigue = 0.1;
        let next = learner.suggest(&state, &StrategyParams::default());
        assert_eq!(next.batch_size, 12);
        assert!(next.new_ratio > 0.2);
        assert_eq!(learner.confidence(&state), 1.0);
    }

    #[test]
    fn confidence_has_a_floor() {
        let learner = HeuristicLearner::default();
        let mut state = UserState::new_at(0);
        state.fatigue = 1.0;
        state.attention = 0.0;
        state.motivation = -1.0;
        assert!((learner.confidence(&state) - 0.512).abs() < 1e-9);
    }
}
