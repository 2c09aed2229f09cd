use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::amas::resilience::CancellationToken;

pub const MAX_COLD_START_RESULTS: usize = 20;

pub const NEUTRAL_ATTENTION: f64 = 0.7;
pub const NEUTRAL_FATIGUE: f64 = 0.0;
pub const NEUTRAL_MOTIVATION: f64 = 0.5;
pub const INITIAL_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DifficultyLevel {
    Easy,
    #[default]
    Mid,
    Hard,
}

impl DifficultyLevel {
    pub const ALL: [DifficultyLevel; 3] = [Self::Easy, Self::Mid, Self::Hard];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Mid => "mid",
            Self::Hard => "hard",
        }
    }

    pub fn harder(&self) -> Self {
        match self {
            Self::Easy => Self::Mid,
            _ => Self::Hard,
        }
    }

    pub fn easier(&self) -> Self {
        match self {
            Self::Hard => Self::Mid,
            _ => Self::Easy,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "easy" => Self::Easy,
            "hard" => Self::Hard,
            _ => Self::Mid,
        }
    }

    /// Bandit encoding of the difficulty axis.
    pub fn feature_value(&self) -> f64 {
        match self {
            Self::Easy => 0.3,
            Self::Mid => 0.6,
            Self::Hard => 0.9,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TrendState {
    Up,
    #[default]
    Flat,
    Stuck,
    Down,
}

impl TrendState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Flat => "flat",
            Self::Stuck => "stuck",
            Self::Down => "down",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "up" => Self::Up,
            "stuck" => Self::Stuck,
            "down" => Self::Down,
            _ => Self::Flat,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Fast,
    #[default]
    Stable,
    Cautious,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Stable => "stable",
            Self::Cautious => "cautious",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColdStartPhase {
    #[default]
    Classify,
    Explore,
    Normal,
}

impl ColdStartPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classify => "classify",
            Self::Explore => "explore",
            Self::Normal => "normal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CognitiveProfile {
    pub mem: f64,
    pub speed: f64,
    pub stability: f64,
}

impl Default for CognitiveProfile {
    fn default() -> Self {
        Self {
            mem: 0.5,
            speed: 0.5,
            stability: 0.5,
        }
    }
}

impl CognitiveProfile {
    pub fn composite(&self) -> f64 {
        (0.5 * self.mem + 0.3 * self.speed + 0.2 * self.stability).clamp(0.0, 1.0)
    }
}

/// Multi-dimensional learner state. Motivation is bounded to `[-1, 1]`,
/// every other scalar to `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserState {
    #[serde(rename = "A")]
    pub attention: f64,
    #[serde(rename = "F")]
    pub fatigue: f64,
    #[serde(rename = "C")]
    pub cognitive: CognitiveProfile,
    #[serde(rename = "M")]
    pub motivation: f64,
    #[serde(rename = "T", default)]
    pub trend: TrendState,
    pub conf: f64,
    pub ts: i64,
    #[serde(rename = "coldStart", default, skip_serializing_if = "Option::is_none")]
    pub cold_start: Option<ColdStartState>,
}

impl Default for UserState {
    fn default() -> Self {
        Self::new_at(chrono::Utc::now().timestamp_millis())
    }
}

impl UserState {
    pub fn new_at(ts: i64) -> Self {
        Self {
            attention: NEUTRAL_ATTENTION,
            fatigue: NEUTRAL_FATIGUE,
            cognitive: CognitiveProfile::default(),
            motivation: NEUTRAL_MOTIVATION,
            trend: TrendState::Flat,
            conf: INITIAL_CONFIDENCE,
            ts,
            cold_start: None,
        }
    }

    pub fn is_within_bounds(&self) -> bool {
        let unit = |v: f64| v.is_finite() && (0.0..=1.0).contains(&v);
        unit(self.attention)
            && unit(self.fatigue)
            && unit(self.conf)
            && unit(self.cognitive.mem)
            && unit(self.cognitive.speed)
            && unit(self.cognitive.stability)
            && self.motivation.is_finite()
            && (-1.0..=1.0).contains(&self.motivation)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub is_correct: bool,
    pub response_time: i64,
    pub error_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColdStartState {
    pub phase: ColdStartPhase,
    pub user_type: Option<UserType>,
    pub probe_index: u32,
    #[serde(default)]
    pub results: VecDeque<ProbeResult>,
    pub settled_strategy: Option<StrategyParams>,
    pub update_count: u32,
    #[serde(default)]
    pub explore_count: u32,
}

impl Default for ColdStartState {
    fn default() -> Self {
        Self {
            phase: ColdStartPhase::Classify,
            user_type: None,
            probe_index: 0,
            results: VecDeque::with_capacity(MAX_COLD_START_RESULTS),
            settled_strategy: None,
            update_count: 0,
            explore_count: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyParams {
    pub interval_scale: f64,
    pub new_ratio: f64,
    pub difficulty: DifficultyLevel,
    pub batch_size: i32,
    pub hint_level: i32,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            interval_scale: 1.0,
            new_ratio: 0.2,
            difficulty: DifficultyLevel::Mid,
            batch_size: 8,
            hint_level: 1,
        }
    }
}

impl StrategyParams {
    pub fn for_user_type(user_type: UserType) -> Self {
        match user_type {
            UserType::Fast => Self {
                interval_scale: 0.8,
                new_ratio: 0.3,
                difficulty: DifficultyLevel::Hard,
                batch_size: 12,
                hint_level: 0,
            },
            UserType::Stable => Self::default(),
            UserType::Cautious => Self {
                interval_scale: 1.2,
                new_ratio: 0.1,
                difficulty: DifficultyLevel::Easy,
                batch_size: 5,
                hint_level: 2,
            },
        }
    }

    pub fn key(&self) -> String {
        format!(
            "{}_{:.2}_{}_{}_{:.2}",
            self.difficulty.as_str(),
            self.new_ratio,
            self.batch_size,
            self.hint_level,
            self.interval_scale
        )
    }
}

/// The raw action chosen by a decision model, before guardrails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub interval_scale: f64,
    pub new_ratio: f64,
    pub difficulty: DifficultyLevel,
    pub batch_size: i32,
    pub hint_level: i32,
}

impl From<StrategyParams> for Action {
    fn from(params: StrategyParams) -> Self {
        Self {
            interval_scale: params.interval_scale,
            new_ratio: params.new_ratio,
            difficulty: params.difficulty,
            batch_size: params.batch_size,
            hint_level: params.hint_level,
        }
    }
}

impl From<Action> for StrategyParams {
    fn from(action: Action) -> Self {
        Self {
            interval_scale: action.interval_scale,
            new_ratio: action.new_ratio,
            difficulty: action.difficulty,
            batch_size: action.batch_size,
            hint_level: action.hint_level,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureVector {
    pub values: Vec<f64>,
    pub labels: Vec<String>,
    pub ts: i64,
}

impl FeatureVector {
    pub fn new(values: Vec<f64>, labels: Vec<String>) -> Self {
        Self::with_ts(values, labels, chrono::Utc::now().timestamp_millis())
    }

    pub fn with_ts(values: Vec<f64>, labels: Vec<String>, ts: i64) -> Self {
        Self { values, labels, ts }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    #[serde(default)]
    pub word_id: Option<String>,
    pub is_correct: bool,
    pub response_time: i64,
    #[serde(default)]
    pub dwell_time: Option<i64>,
    #[serde(default)]
    pub retry_count: i32,
    #[serde(default)]
    pub paused_time_ms: Option<i64>,
    #[serde(default)]
    pub hint_used: bool,
    #[serde(default)]
    pub is_quit: bool,
    pub timestamp: i64,
}

impl Default for RawEvent {
    fn default() -> Self {
        Self {
            word_id: None,
            is_correct: true,
            response_time: 3000,
            dwell_time: None,
            retry_count: 0,
            paused_time_ms: None,
            hint_used: false,
            is_quit: false,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

impl RawEvent {
    /// Rejects events that must never reach the models.
    pub fn validate(&self) -> Result<(), String> {
        if self.response_time < 0 {
            return Err(format!("negative response time: {}", self.response_time));
        }
        if let Some(dwell) = self.dwell_time {
            if dwell < 0 {
                return Err(format!("negative dwell time: {dwell}"));
            }
        }
        if let Some(paused) = self.paused_time_ms {
            if paused < 0 {
                return Err(format!("negative paused time: {paused}"));
            }
        }
        if self.retry_count < 0 {
            return Err(format!("negative retry count: {}", self.retry_count));
        }
        if self.timestamp <= 0 {
            return Err(format!("invalid timestamp: {}", self.timestamp));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    CircuitOpen,
    Timeout,
    Exception,
    DegradedState,
    MissingFeatures,
    ModelUnavailable,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CircuitOpen => "circuit_open",
            Self::Timeout => "timeout",
            Self::Exception => "exception",
            Self::DegradedState => "degraded_state",
            Self::MissingFeatures => "missing_features",
            Self::ModelUnavailable => "model_unavailable",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionFactor {
    pub name: String,
    pub value: f64,
    pub impact: String,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DecisionExplanation {
    pub factors: Vec<DecisionFactor>,
    pub changes: Vec<String>,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reward {
    pub value: f64,
    pub reason: String,
    pub ts: i64,
}

impl Reward {
    pub fn new(value: f64, reason: impl Into<String>, ts: i64) -> Self {
        Self {
            value,
            reason: reason.into(),
            ts,
        }
    }

    pub fn zero(ts: i64) -> Self {
        Self::new(0.0, "no_update", ts)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResult {
    pub strategy: StrategyParams,
    pub action: Action,
    pub state: UserState,
    pub reward: Reward,
    pub explanation: DecisionExplanation,
    pub should_break: bool,
    pub feature_vector: Option<FeatureVector>,
    pub cold_start_phase: ColdStartPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<FallbackReason>,
}

impl ProcessResult {
    pub fn is_fallback(&self) -> bool {
        self.fallback_reason.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Estimate and decide without training any model.
    pub skip_update: bool,
    pub cancellation: Option<CancellationToken>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayedRewardResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DelayedRewardResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}
