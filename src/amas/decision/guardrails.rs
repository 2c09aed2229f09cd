use serde::{Deserialize, Serialize};

use crate::amas::config::GuardrailPolicy;
use crate::amas::types::{DifficultyLevel, StrategyParams, UserState};

const HARD_MIN_BATCH: i32 = 5;
const HARD_MAX_BATCH: i32 = 20;
const HARD_MIN_INTERVAL: f64 = 0.5;
const HARD_MAX_INTERVAL: f64 = 2.0;
const HARD_MAX_HINT: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailRule {
    BatchStepLimit,
    HighFatigue,
    LowAttention,
    ForceBreak,
    Bounds,
}

impl GuardrailRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BatchStepLimit => "batch_step_limit",
            Self::HighFatigue => "high_fatigue",
            Self::LowAttention => "low_attention",
            Self::ForceBreak => "force_break",
            Self::Bounds => "bounds",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GuardrailOutcome {
    pub strategy: StrategyParams,
    pub should_break: bool,
    pub applied: Vec<GuardrailRule>,
}

/// Effective limits: the policy's bounds intersected with the hard ones.
#[derive(Debug, Clone, Copy)]
struct Bounds {
    min_batch: i32,
    max_batch: i32,
    min_ratio: f64,
    max_ratio: f64,
    min_interval: f64,
    max_interval: f64,
    max_hint: i32,
}

impl Bounds {
    fn from_policy(policy: &GuardrailPolicy) -> Self {
        let min_batch = policy.min_batch_size.clamp(HARD_MIN_BATCH, HARD_MAX_BATCH);
        let max_batch = policy.max_batch_size.clamp(min_batch, HARD_MAX_BATCH);
        let min_ratio = policy.min_new_ratio.clamp(0.0, 1.0);
        let max_ratio = policy.max_new_ratio.clamp(min_ratio, 1.0);
        let min_interval = policy
            .min_interval_scale
            .clamp(HARD_MIN_INTERVAL, HARD_MAX_INTERVAL);
        let max_interval = policy
            .max_interval_scale
            .clamp(min_interval, HARD_MAX_INTERVAL);
        Self {
            min_batch,
            max_batch,
            min_ratio,
            max_ratio,
            min_interval,
            max_interval,
            max_hint: policy.max_hint_level.clamp(0, HARD_MAX_HINT),
        }
    }

    fn clamp(&self, s: &mut StrategyParams) -> bool {
        let before = s.clone();
        s.batch_size = s.batch_size.clamp(self.min_batch, self.max_batch);
        s.new_ratio = if s.new_ratio.is_finite() {
            s.new_ratio.clamp(self.min_ratio, self.max_ratio)
        } else {
            self.min_ratio
        };
        s.interval_scale = if s.interval_scale.is_finite() {
            s.interval_scale.clamp(self.min_interval, self.max_interval)
        } else {
            1.0_f64.clamp(self.min_interval, self.max_interval)
        };
        s.hint_level = s.hint_level.clamp(0, self.max_hint);
        *s != before
    }
}

/// Maps a proposed action onto a safe strategy given the previous one and the
/// learner's current state.
pub fn apply_guardrails(
    policy: &GuardrailPolicy,
    proposed: &StrategyParams,
    previous: Option<&StrategyParams>,
    state: &UserState,
) -> GuardrailOutcome {
    let bounds = Bounds::from_policy(policy);
    let mut strategy = proposed.clone();
    let mut applied = Vec::new();
    let mut should_break = false;

    if let Some(prev) = previous {
        let step = policy.max_batch_step.max(1);
        let limited = strategy
            .batch_size
            .clamp(prev.batch_size - step, prev.batch_size + step);
        if limited != strategy.batch_size {
            strategy.batch_size = limited;
            applied.push(GuardrailRule::BatchStepLimit);
        }
    }

    if state.fatigue > policy.high_fatigue {
        strategy.batch_size = strategy.batch_size.min(policy.high_fatigue_max_batch);
        strategy.new_ratio = strategy.new_ratio.min(policy.high_fatigue_max_new_ratio);
        if strategy.difficulty == DifficultyLevel::Hard {
            strategy.difficulty = DifficultyLevel::Mid;
        }
        applied.push(GuardrailRule::HighFatigue);
    }

    if state.attention < policy.low_attention && strategy.hint_level < 1 {
        strategy.hint_level = 1;
        applied.push(GuardrailRule::LowAttention);
    }

    if state.fatigue > policy.force_break_fatigue {
        strategy.difficulty = DifficultyLevel::Easy;
        strategy.batch_size = bounds.min_batch;
        strategy.new_ratio = bounds.min_ratio;
        strategy.hint_level = bounds.max_hint;
        should_break = true;
        applied.push(GuardrailRule::ForceBreak);
    }

    if bounds.clamp(&mut strategy) {
        applied.push(GuardrailRule::Bounds);
    }

    GuardrailOutcome {
        strategy,
        should_break,
        applied,
    }
}
