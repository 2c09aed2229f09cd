use crate::amas::config::{ColdStartPolicy, COLD_START_PROBE_COUNT};
use crate::amas::types::{
    ColdStartPhase, ColdStartState, DifficultyLevel, ProbeResult, StrategyParams, UserType,
    MAX_COLD_START_RESULTS,
};

/// Three-phase onboarding: a fixed probe sequence, a short exploration
/// around the detected user type, then hand-off to the learned models.
#[derive(Debug, Clone)]
pub struct ColdStartManager {
    policy: ColdStartPolicy,
    state: ColdStartState,
}

impl ColdStartManager {
    pub fn new(policy: ColdStartPolicy) -> Self {
        Self {
            policy,
            state: ColdStartState::default(),
        }
    }

    /// Restores a persisted snapshot, repairing fields that contradict each other.
    pub fn from_state(policy: ColdStartPolicy, state: ColdStartState) -> Self {
        let mut manager = Self { policy, state };
        manager.repair();
        manager
    }

    /// The strategy the learner should receive next.
    pub fn current_action(&self) -> Option<StrategyParams> {
        match self.state.phase {
            ColdStartPhase::Classify => {
                let idx = (self.state.probe_index as usize).min(self.probe_count() - 1);
                self.policy.probe_actions.get(idx).cloned()
            }
            ColdStartPhase::Explore => {
                let variants = self.explore_variants();
                let idx = self.state.explore_count as usize % variants.len();
                variants.into_iter().nth(idx)
            }
            ColdStartPhase::Normal => self.state.settled_strategy.clone(),
        }
    }

    /// Records the outcome of the previously issued action and returns the next one.
    pub fn update(
        &mut self,
        is_correct: bool,
        response_time: i64,
        error_rate: f64,
    ) -> Option<StrategyParams> {
        if self.state.phase == ColdStartPhase::Normal {
            return None;
        }

        self.record(ProbeResult {
            is_correct,
            response_time: response_time.max(0),
            error_rate: if error_rate.is_finite() {
                error_rate.clamp(0.0, 1.0)
            } else {
                0.0
            },
        });
        self.state.update_count += 1;

        match self.state.phase {
            ColdStartPhase::Classify => {
                self.state.probe_index += 1;
                if self.state.probe_index as usize >= self.probe_count() {
                    self.finish_classify();
                }
            }
            ColdStartPhase::Explore => {
                self.state.explore_count += 1;
                if self.explore_settled() {
                    self.finish_explore();
                }
            }
            ColdStartPhase::Normal => {}
        }

        self.current_action()
    }

    pub fn phase(&self) -> ColdStartPhase {
        self.state.phase
    }

    pub fn state(&self) -> &ColdStartState {
        &self.state
    }

    pub fn into_state(self) -> ColdStartState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state.phase == ColdStartPhase::Normal
    }

    pub fn user_type(&self) -> Option<UserType> {
        self.state.user_type
    }

    pub fn settled_strategy(&self) -> Option<&StrategyParams> {
        self.state.settled_strategy.as_ref()
    }

    fn probe_count(&self) -> usize {
        self.policy
            .probe_actions
            .len()
            .clamp(1, COLD_START_PROBE_COUNT)
    }

    fn record(&mut self, result: ProbeResult) {
        if self.state.results.len() >= MAX_COLD_START_RESULTS {
            self.state.results.pop_front();
        }
        self.state.results.push_back(result);
    }

    fn recent(&self, n: usize) -> impl Iterator<Item = &ProbeResult> + '_ {
        let skip = self.state.results.len().saturating_sub(n);
        self.state.results.iter().skip(skip)
    }

    fn accuracy_of(&self, n: usize) -> Option<f64> {
        let (correct, total) = self
            .recent(n)
            .fold((0usize, 0usize), |(c, t), r| (c + r.is_correct as usize, t + 1));
        (total > 0).then(|| correct as f64 / total as f64)
    }

    fn finish_classify(&mut self) {
        let probes = self.probe_count();
        let accuracy = self.accuracy_of(probes).unwrap_or(0.0);
        let count = self.recent(probes).count().max(1);
        let mean_rt = self.recent(probes).map(|r| r.response_time as f64).sum::<f64>() / count as f64;

        let user_type = if accuracy >= self.policy.fast_min_accuracy
            && mean_rt <= self.policy.fast_max_avg_response_ms
        {
            UserType::Fast
        } else if accuracy < self.policy.cautious_max_accuracy {
            UserType::Cautious
        } else {
            UserType::Stable
        };

        tracing::debug!(
            user_type = user_type.as_str(),
            accuracy,
            mean_rt,
            "cold start classified"
        );

        self.state.user_type = Some(user_type);
        self.state.phase = ColdStartPhase::Explore;
        self.state.probe_index = probes as u32;
        self.state.explore_count = 0;
    }

    fn explore_settled(&self) -> bool {
        let explored = self.state.explore_count;
        if explored >= self.policy.max_explore_samples {
            return true;
        }
        if explored < self.policy.min_explore_samples {
            return false;
        }

        let window = self.policy.explore_window.min(explored as usize).max(1);
        let outcomes: Vec<f64> = self
            .recent(window)
            .map(|r| if r.is_correct { 1.0 } else { 0.0 })
            .collect();
        variance(&outcomes) < self.policy.explore_variance_threshold
    }

    fn finish_explore(&mut self) {
        let accuracy = self
            .accuracy_of(self.state.explore_count as usize)
            .unwrap_or(0.0);
        let user_type = self.state.user_type.unwrap_or(UserType::Stable);
        let base = StrategyParams::for_user_type(user_type);

        let settled = if accuracy >= self.policy.explore_high_accuracy {
            StrategyParams {
                difficulty: DifficultyLevel::Hard,
                new_ratio: (base.new_ratio + 0.1).min(0.4),
                ..base
            }
        } else if accuracy <= self.policy.explore_low_accuracy {
            StrategyParams {
                difficulty: DifficultyLevel::Easy,
                new_ratio: (base.new_ratio - 0.1).max(0.1),
                hint_level: 2,
                ..base
            }
        } else {
            base
        };

        tracing::debug!(
            user_type = user_type.as_str(),
            accuracy,
            strategy = %settled.key(),
            "cold start settled"
        );

        self.state.settled_strategy = Some(settled);
        self.state.phase = ColdStartPhase::Normal;
    }

    fn explore_variants(&self) -> Vec<StrategyParams> {
        let user_type = self.state.user_type.unwrap_or(UserType::Stable);
        let base = StrategyParams::for_user_type(user_type);
        match user_type {
            UserType::Fast => vec![
                base.clone(),
                StrategyParams {
                    batch_size: 16,
                    ..base.clone()
                },
                StrategyParams {
                    new_ratio: 0.4,
                    ..base.clone()
                },
                StrategyParams {
                    difficulty: DifficultyLevel::Mid,
                    interval_scale: 1.0,
                    hint_level: 1,
                    ..base
                },
            ],
            UserType::Stable => vec![
                base.clone(),
                StrategyParams {
                    batch_size: 12,
                    ..base.clone()
                },
                StrategyParams {
                    new_ratio: 0.3,
                    ..base
                },
            ],
            UserType::Cautious => vec![
                base.clone(),
                StrategyParams {
                    batch_size: 8,
                    ..base.clone()
                },
                StrategyParams {
                    difficulty: DifficultyLevel::Mid,
                    interval_scale: 1.0,
                    hint_level: 1,
                    ..base
                },
            ],
        }
    }

    fn repair(&mut self) {
        while self.state.results.len() > MAX_COLD_START_RESULTS {
            self.state.results.pop_front();
        }

        match self.state.phase {
            ColdStartPhase::Classify => {
                let held = self.state.results.len().min(self.probe_count()) as u32;
                if self.state.probe_index > held {
                    tracing::warn!(
                        probe_index = self.state.probe_index,
                        held,
                        "cold start probe index ahead of recorded results, rewinding"
                    );
                    self.state.probe_index = held;
                }
                if self.state.probe_index as usize >= self.probe_count() {
                    self.finish_classify();
                }
            }
            ColdStartPhase::Explore | ColdStartPhase::Normal => {
                if self.state.user_type.is_none() {
                    tracing::warn!(
                        phase = self.state.phase.as_str(),
                        "cold start snapshot without user type, assuming stable"
                    );
                    self.state.user_type = Some(UserType::Stable);
                }
                if self.state.phase == ColdStartPhase::Normal
                    && self.state.settled_strategy.is_none()
                {
                    let user_type = self.state.user_type.unwrap_or(UserType::Stable);
                    self.state.settled_strategy = Some(StrategyParams::for_user_type(user_type));
                }
            }
        }
    }
}

impl Default for ColdStartManager {
    fn default() -> Self {
        Self::new(ColdStartPolicy::default())
    }
}

fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(manager: &mut ColdStartManager, outcomes: &[(bool, i64)]) {
        for (correct, rt) in outcomes {
            manager.update(*correct, *rt, 0.0);
        }
    }

    #[test]
    fn probes_follow_policy_order() {
        let policy = ColdStartPolicy::default();
        let mut manager = ColdStartManager::new(policy.clone());
        for (i, expected) in policy.probe_actions.iter().enumerate() {
            assert_eq!(manager.state().probe_index, i as u32);
            assert_eq!(manager.current_action().as_ref(), Some(expected));
            manager.update(true, 3000, 0.0);
        }
        assert_eq!(manager.phase(), ColdStartPhase::Explore);
        assert_eq!(manager.state().probe_index, 5);
    }

    #[test]
    fn fast_correct_answers_classify_fast() {
        let mut manager = ColdStartManager::default();
        run(&mut manager, &[(true, 1200); 5]);
        assert_eq!(manager.phase(), ColdStartPhase::Explore);
        assert_eq!(manager.user_type(), Some(UserType::Fast));
        assert_eq!(
            manager.current_action(),
            Some(StrategyParams::for_user_type(UserType::Fast))
        );
    }

    #[test]
    fn poor_accuracy_classifies_cautious() {
        let mut manager = ColdStartManager::default();
        run(
            &mut manager,
            &[(false, 5000), (true, 5000), (false, 5000), (true, 5000), (false, 5000)],
        );
        assert_eq!(manager.user_type(), Some(UserType::Cautious));
    }

    #[test]
    fn accurate_but_slow_is_stable() {
        let mut manager = ColdStartManager::default();
        run(&mut manager, &[(true, 4500); 5]);
        assert_eq!(manager.user_type(), Some(UserType::Stable));
    }

    #[test]
    fn consistent_explore_settles_after_minimum() {
        let mut manager = ColdStartManager::default();
        run(&mut manager, &[(true, 1200); 5]);
        run(&mut manager, &[(true, 1200); 4]);
        assert_eq!(manager.phase(), ColdStartPhase::Explore);
        manager.update(true, 1200, 0.0);
        assert_eq!(manager.phase(), ColdStartPhase::Normal);
        let settled = manager.settled_strategy().unwrap();
        assert_eq!(settled.difficulty, DifficultyLevel::Hard);
        assert!((settled.new_ratio - 0.4).abs() < 1e-9);
    }

    #[test]
    fn noisy_explore_runs_until_maximum() {
        let mut manager = ColdStartManager::default();
        run(&mut manager, &[(true, 3000); 5]);
        for i in 0..14 {
            manager.update(i % 2 == 0, 3000, 0.5);
            assert_eq!(manager.phase(), ColdStartPhase::Explore, "step {i}");
        }
        manager.update(true, 3000, 0.5);
        assert_eq!(manager.phase(), ColdStartPhase::Normal);
        assert_eq!(manager.state().explore_count, 15);
    }

    #[test]
    fn results_are_capped() {
        let mut manager = ColdStartManager::default();
        for i in 0..19 {
            manager.update(i % 2 == 0, 3000, 0.0);
        }
        assert!(manager.state().results.len() <= MAX_COLD_START_RESULTS);
        assert_eq!(manager.state().update_count, 19);
    }

    #[test]
    fn normal_phase_ignores_updates() {
        let mut manager = ColdStartManager::default();
        run(&mut manager, &[(true, 1200); 10]);
        assert!(manager.is_complete());
        let before = manager.state().clone();
        assert!(manager.update(false, 9000, 1.0).is_none());
        assert_eq!(manager.state(), &before);
    }

    #[test]
    fn repair_rewinds_probe_index_without_evidence() {
        let state = ColdStartState {
            probe_index: 3,
            ..Default::default()
        };
        let manager = ColdStartManager::from_state(ColdStartPolicy::default(), state);
        assert_eq!(manager.state().probe_index, 0);
        assert_eq!(manager.phase(), ColdStartPhase::Classify);
    }

    #[test]
    fn repair_fills_missing_user_type_and_strategy() {
        let explore = ColdStartState {
            phase: ColdStartPhase::Explore,
            probe_index: 5,
            ..Default::default()
        };
        let manager = ColdStartManager::from_state(ColdStartPolicy::default(), explore);
        assert_eq!(manager.user_type(), Some(UserType::Stable));

        let normal = ColdStartState {
            phase: ColdStartPhase::Normal,
            user_type: Some(UserType::Cautious),
            ..Default::default()
        };
        let manager = ColdStartManager::from_state(ColdStartPolicy::default(), normal);
        assert_eq!(
            manager.settled_strategy(),
            Some(&StrategyParams::for_user_type(UserType::Cautious))
        );
    }

    #[test]
    fn repair_completes_classification_when_all_probes_held() {
        let mut seeded = ColdStartManager::default();
        run(&mut seeded, &[(true, 1000); 4]);
        let mut snapshot = seeded.state().clone();
        snapshot.results.push_back(ProbeResult {
            is_correct: true,
            response_time: 1000,
            error_rate: 0.0,
        });
        snapshot.probe_index = 5;

        let manager = ColdStartManager::from_state(ColdStartPolicy::default(), snapshot);
        assert_eq!(manager.phase(), ColdStartPhase::Explore);
        assert_eq!(manager.user_type(), Some(UserType::Fast));
    }
}
