use serde::{Deserialize, Serialize};

use crate::amas::config::EnsembleConfig;
use crate::amas::decision::actions::{snap_batch_size, snap_interval_scale, snap_new_ratio};
use crate::amas::types::{DifficultyLevel, StrategyParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Member {
    Bandit,
    Thompson,
    Heuristic,
}

impl Member {
    pub const ALL: [Member; 3] = [Self::Bandit, Self::Thompson, Self::Heuristic];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bandit => "bandit",
            Self::Thompson => "thompson",
            Self::Heuristic => "heuristic",
        }
    }

    fn index(&self) -> usize {
        match self {
            Self::Bandit => 0,
            Self::Thompson => 1,
            Self::Heuristic => 2,
        }
    }
}

/// One member's proposal, with the weight it carried when the blend was made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub member: Member,
    pub strategy: StrategyParams,
    pub confidence: f64,
    pub weight: f64,
}

/// Blends member votes by weight × confidence and learns the weights with a
/// multiplicative rule driven by the executed action's reward.
#[derive(Debug, Clone)]
pub struct EnsembleArbiter {
    weights: [f64; 3],
    learning_rate: f64,
    min_weight: f64,
    last_confidence: f64,
    last_votes: Vec<Vote>,
}

impl EnsembleArbiter {
    pub fn new(config: &EnsembleConfig) -> Self {
        let mut arbiter = Self {
            weights: [
                config.bandit_weight,
                config.thompson_weight,
                config.heuristic_weight,
            ],
            learning_rate: config.learning_rate.max(0.0),
            min_weight: config.min_weight.clamp(0.0, 1.0 / 3.0),
            last_confidence: 0.0,
            last_votes: Vec::new(),
        };
        arbiter.normalize();
        arbiter
    }

    pub fn weight(&self, member: Member) -> f64 {
        self.weights[member.index()]
    }

    pub fn weights(&self) -> [(Member, f64); 3] {
        Member::ALL.map(|m| (m, self.weight(m)))
    }

    pub fn last_confidence(&self) -> f64 {
        self.last_confidence
    }

    pub fn last_votes(&self) -> &[Vote] {
        &self.last_votes
    }

    /// Returns `None` only when no member voted.
    pub fn decide(
        &mut self,
        proposals: Vec<(Member, StrategyParams, f64)>,
    ) -> Option<StrategyParams> {
        let votes: Vec<Vote> = proposals
            .into_iter()
            .map(|(member, strategy, confidence)| Vote {
                member,
                strategy,
                confidence: if confidence.is_finite() {
                    confidence.clamp(0.0, 1.0)
                } else {
                    0.0
                },
                weight: self.weight(member),
            })
            .collect();

        if votes.is_empty() {
            return None;
        }

        let total_weight: f64 = votes.iter().map(|v| v.weight).sum();
        let blended_conf: f64 = votes.iter().map(|v| v.weight * v.confidence).sum();
        self.last_confidence = if total_weight > 1e-9 {
            (blended_conf / total_weight).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let merged = weighted_merge(&votes);
        self.last_votes = votes;
        Some(merged)
    }

    /// `w_i ← w_i · exp(η · r · (2·sim_i − 1))`, floored and renormalized.
    pub fn update(&mut self, executed: &StrategyParams, reward: f64) {
        if self.last_votes.is_empty() || !reward.is_finite() {
            return;
        }
        let reward = reward.clamp(-1.0, 1.0);

        for vote in &self.last_votes {
            let sim = strategy_similarity(&vote.strategy, executed);
            let idx = vote.member.index();
            self.weights[idx] *= (self.learning_rate * reward * (2.0 * sim - 1.0)).exp();
        }
        self.normalize();
    }

    fn normalize(&mut self) {
        for w in self.weights.iter_mut() {
            if !w.is_finite() || *w < self.min_weight {
                *w = self.min_weight;
            }
        }
        let total: f64 = self.weights.iter().sum();
        if total > 1e-9 {
            for w in self.weights.iter_mut() {
                *w /= total;
            }
        } else {
            self.weights = [1.0 / 3.0; 3];
        }
    }
}

impl Default for EnsembleArbiter {
    fn default() -> Self {
        Self::new(&EnsembleConfig::default())
    }
}

pub fn strategy_similarity(a: &StrategyParams, b: &StrategyParams) -> f64 {
    let diff = if a.difficulty == b.difficulty {
        1.0
    } else {
        0.0
    };
    let ratio = 1.0 - (a.new_ratio - b.new_ratio).abs();
    let batch = 1.0 - ((a.batch_size - b.batch_size).abs() as f64 / 15.0);
    let interval = 1.0 - (a.interval_scale - b.interval_scale).abs();
    (0.3 * diff + 0.25 * ratio + 0.25 * batch + 0.2 * interval).clamp(0.0, 1.0)
}

fn weighted_merge(votes: &[Vote]) -> StrategyParams {
    let total: f64 = votes.iter().map(|v| v.weight * v.confidence).sum();
    if total < 1e-6 {
        return votes[0].strategy.clone();
    }

    let mut interval_scale = 0.0;
    let mut new_ratio = 0.0;
    let mut batch_size = 0.0;
    let mut hint_level = 0.0;
    let mut difficulty_scores = [0.0f64; 3];

    for v in votes {
        let w = v.weight * v.confidence / total;
        interval_scale += w * v.strategy.interval_scale;
        new_ratio += w * v.strategy.new_ratio;
        batch_size += w * v.strategy.batch_size as f64;
        hint_level += w * v.strategy.hint_level as f64;

        match v.strategy.difficulty {
            DifficultyLevel::Easy => difficulty_scores[0] += w,
            DifficultyLevel::Mid => difficulty_scores[1] += w,
            DifficultyLevel::Hard => difficulty_scores[2] += w,
        }
    }

    let difficulty = if difficulty_scores[2] > difficulty_scores[1]
        && difficulty_scores[2] > difficulty_scores[0]
    {
        DifficultyLevel::Hard
    } else if difficulty_scores[0] > difficulty_scores[1] {
        DifficultyLevel::Easy
    } else {
        DifficultyLevel::Mid
    };

    StrategyParams {
        interval_scale: snap_interval_scale(interval_scale),
        new_ratio: snap_new_ratio(new_ratio),
        difficulty,
        batch_size: snap_batch_size(batch_size),
        hint_level: hint_level.round() as i32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amas::types::UserType;

    #[test]
    fn default_weights_follow_config() {
        let arbiter = EnsembleArbiter::default();
        assert!((arbiter.weight(Member::Bandit) - 0.4).abs() < 1e-9);
        assert!((arbiter.weight(Member::Heuristic) - 0.2).abs() < 1e-9);
    }

    #[test]
    fn no_votes_no_decision() {
        let mut arbiter = EnsembleArbiter::default();
        assert!(arbiter.decide(vec![]).is_none());
    }

    #[test]
    fn unanimous_votes_return_that_strategy() {
        let mut arbiter = EnsembleArbiter::default();
        let s = StrategyParams::for_user_type(UserType::Fast);
        let merged = arbiter
            .decide(Member::ALL.iter().map(|m| (*m, s.clone(), 0.8)).collect())
            .unwrap();
        assert_eq!(merged, s);
        assert!((arbiter.last_confidence() - 0.8).abs() < 1e-9);
        assert_eq!(arbiter.last_votes().len(), 3);
    }

    #[test]
    fn blend_snaps_to_grids_and_uses_plurality_difficulty() {
        let mut arbiter = EnsembleArbiter::default();
        let hard = StrategyParams::for_user_type(UserType::Fast);
        let easy = StrategyParams::for_user_type(UserType::Cautious);
        let merged = arbiter
            .decide(vec![
                (Member::Bandit, hard.clone(), 0.9),
                (Member::Thompson, hard, 0.9),
                (Member::Heuristic, easy, 0.9),
            ])
            .unwrap();
        assert_eq!(merged.difficulty, DifficultyLevel::Hard);
        assert!([5, 8, 12, 16].contains(&merged.batch_size));
        assert!([0.1, 0.2, 0.3, 0.4]
            .iter()
            .any(|r| (r - merged.new_ratio).abs() < 1e-9));
    }

    #[test]
    fn positive_reward_shifts_weight_toward_matching_member() {
        let mut arbiter = EnsembleArbiter::default();
        let hard = StrategyParams::for_user_type(UserType::Fast);
        let easy = StrategyParams::for_user_type(UserType::Cautious);
        arbiter.decide(vec![
            (Member::Bandit, hard.clone(), 0.9),
            (Member::Thompson, easy, 0.9),
        ]);
        let before = arbiter.weight(Member::Bandit);
        arbiter.update(&hard, 1.0);
        assert!(arbiter.weight(Member::Bandit) > before);

        let sum: f64 = arbiter.weights().iter().map(|(_, w)| w).sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn negative_reward_shifts_weight_away() {
        let mut arbiter = EnsembleArbiter::default();
        let hard = StrategyParams::for_user_type(UserType::Fast);
        let easy = StrategyParams::for_user_type(UserType::Cautious);
        arbiter.decide(vec![
            (Member::Bandit, hard.clone(), 0.9),
            (Member::Thompson, easy, 0.9),
        ]);
        let before = arbiter.weight(Member::Bandit);
        arbiter.update(&hard, -1.0);
        assert!(arbiter.weight(Member::Bandit) < before);
    }

    #[test]
    fn weights_never_collapse() {
        let mut arbiter = EnsembleArbiter::default();
        let hard = StrategyParams::for_user_type(UserType::Fast);
        let easy = StrategyParams::for_user_type(UserType::Cautious);
        for _ in 0..2000 {
            arbiter.decide(vec![
                (Member::Bandit, hard.clone(), 0.9),
                (Member::Heuristic, easy.clone(), 0.9),
            ]);
            arbiter.update(&hard, 1.0);
        }
        for (_, w) in arbiter.weights() {
            assert!(w > 0.04, "weight {w}");
        }
    }

    #[test]
    fn similarity_is_one_for_identical() {
        let s = StrategyParams::default();
        assert!((strategy_similarity(&s, &s) - 1.0).abs() < 1e-9);
    }
}
