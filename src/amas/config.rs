use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::amas::error::{AmasError, Result};
use crate::amas::types::{StrategyParams, UserType};
use crate::config::{Config, Environment};

pub const POLICY_VERSION: &str = "amas-policy/v1";
pub const COLD_START_PROBE_COUNT: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerceptionConfig {
    pub max_response_time: i64,
    pub max_dwell_time: i64,
    pub max_retry_count: i32,
    /// Response times above this are treated as idle outliers, not answers.
    pub anomaly_response_time: i64,
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self {
            max_response_time: 30000,
            max_dwell_time: 10000,
            max_retry_count: 5,
            anomaly_response_time: 300000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttentionWeights {
    pub rt_mean: f64,
    pub rt_cv: f64,
    pub pace_cv: f64,
    pub pause: f64,
    pub retry: f64,
    pub accuracy: f64,
    pub dwell: f64,
    pub hint: f64,
}

impl AttentionWeights {
    pub fn total(&self) -> f64 {
        self.rt_mean
            + self.rt_cv
            + self.pace_cv
            + self.pause
            + self.retry
            + self.accuracy
            + self.dwell
            + self.hint
    }
}

impl Default for AttentionWeights {
    fn default() -> Self {
        Self {
            rt_mean: 0.20,
            rt_cv: 0.15,
            pace_cv: 0.10,
            pause: 0.15,
            retry: 0.10,
            accuracy: 0.15,
            dwell: 0.05,
            hint: 0.10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FatigueParams {
    pub beta: f64,
    pub gamma: f64,
    pub delta: f64,
    pub k: f64,
    pub long_break_threshold: f64,
}

impl Default for FatigueParams {
    fn default() -> Self {
        Self {
            beta: 0.3,
            gamma: 0.3,
            delta: 0.2,
            k: 0.05,
            long_break_threshold: 30.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotivationParams {
    pub rho: f64,
    pub kappa: f64,
    pub lambda: f64,
    pub mu: f64,
}

impl Default for MotivationParams {
    fn default() -> Self {
        Self {
            rho: 0.9,
            kappa: 0.1,
            lambda: 0.15,
            mu: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CognitiveParams {
    pub memory_alpha: f64,
    pub speed_baseline_ms: f64,
    pub stability_window: usize,
}

impl Default for CognitiveParams {
    fn default() -> Self {
        Self {
            memory_alpha: 0.1,
            speed_baseline_ms: 3000.0,
            stability_window: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendParams {
    pub window_size: usize,
    pub min_samples: usize,
    pub up_threshold: f64,
    pub down_threshold: f64,
    pub stuck_variance_threshold: f64,
}

impl Default for TrendParams {
    fn default() -> Self {
        Self {
            window_size: 10,
            min_samples: 5,
            up_threshold: 0.01,
            down_threshold: -0.01,
            stuck_variance_threshold: 0.0005,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanditConfig {
    pub alpha: f64,
    pub lambda: f64,
    pub context_dim: usize,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            alpha: 0.3,
            lambda: 1.0,
            context_dim: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardConfig {
    pub accuracy_weight: f64,
    pub speed_weight: f64,
    pub stability_weight: f64,
    pub retention_weight: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            accuracy_weight: 0.4,
            speed_weight: 0.2,
            stability_weight: 0.2,
            retention_weight: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleConfig {
    pub bandit_weight: f64,
    pub thompson_weight: f64,
    pub heuristic_weight: f64,
    pub learning_rate: f64,
    pub min_weight: f64,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            bandit_weight: 0.4,
            thompson_weight: 0.4,
            heuristic_weight: 0.2,
            learning_rate: 0.1,
            min_weight: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThompsonContextConfig {
    pub bins: usize,
    pub weight: f64,
}

impl Default for ThompsonContextConfig {
    fn default() -> Self {
        Self {
            bins: 3,
            weight: 0.7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DecisionModelKind {
    Bandit,
    #[default]
    Ensemble,
    Thompson,
}

impl DecisionModelKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "bandit" | "linucb" => Some(Self::Bandit),
            "ensemble" => Some(Self::Ensemble),
            "thompson" => Some(Self::Thompson),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl_ms: i64,
    pub sweep_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10000,
            ttl_ms: 30 * 60 * 1000,
            sweep_interval_ms: 60 * 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub window_size: usize,
    pub failure_threshold: u32,
    pub failure_rate_threshold: f64,
    pub open_duration_ms: u64,
    pub half_open_successes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            failure_threshold: 5,
            failure_rate_threshold: 0.5,
            open_duration_ms: 5000,
            half_open_successes: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub event_ms: u64,
    pub lock_ms: u64,
    pub delayed_reward_ms: u64,
}

impl TimeoutConfig {
    pub fn for_environment(env: Environment) -> Self {
        let event = env.event_timeout().as_millis() as u64;
        Self {
            event_ms: event,
            lock_ms: env.lock_timeout().as_millis() as u64,
            delayed_reward_ms: event,
        }
    }

    pub fn event(&self) -> Duration {
        Duration::from_millis(self.event_ms)
    }

    pub fn lock(&self) -> Duration {
        Duration::from_millis(self.lock_ms)
    }

    pub fn delayed_reward(&self) -> Duration {
        Duration::from_millis(self.delayed_reward_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self::for_environment(Environment::Development)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecayConfig {
    /// Per-day pull toward neutral for A/F/M when a user returns after a day or more.
    pub offline_drift_rate: f64,
    pub offline_confidence_decay: f64,
    pub min_confidence: f64,
    pub session_reset_minutes: f64,
    pub short_break_minutes: f64,
    pub fatigue_decay_per_minute: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            offline_drift_rate: 0.5,
            offline_confidence_decay: 0.9,
            min_confidence: 0.1,
            session_reset_minutes: 30.0,
            short_break_minutes: 5.0,
            fatigue_decay_per_minute: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColdStartPolicy {
    pub probe_actions: Vec<StrategyParams>,
    pub fast_min_accuracy: f64,
    pub fast_max_avg_response_ms: f64,
    pub cautious_max_accuracy: f64,
    pub explore_window: usize,
    pub explore_variance_threshold: f64,
    pub min_explore_samples: u32,
    pub max_explore_samples: u32,
    pub explore_high_accuracy: f64,
    pub explore_low_accuracy: f64,
}

impl Default for ColdStartPolicy {
    fn default() -> Self {
        let stable = StrategyParams::for_user_type(UserType::Stable);
        let fast = StrategyParams::for_user_type(UserType::Fast);
        let cautious = StrategyParams::for_user_type(UserType::Cautious);
        Self {
            probe_actions: vec![
                stable.clone(),
                fast.clone(),
                cautious,
                StrategyParams {
                    batch_size: 12,
                    ..stable
                },
                StrategyParams {
                    batch_size: 8,
                    hint_level: 1,
                    ..fast
                },
            ],
            fast_min_accuracy: 0.8,
            fast_max_avg_response_ms: 2000.0,
            cautious_max_accuracy: 0.6,
            explore_window: 5,
            explore_variance_threshold: 0.2,
            min_explore_samples: 5,
            max_explore_samples: 15,
            explore_high_accuracy: 0.85,
            explore_low_accuracy: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailPolicy {
    pub min_batch_size: i32,
    pub max_batch_size: i32,
    pub max_batch_step: i32,
    pub min_new_ratio: f64,
    pub max_new_ratio: f64,
    pub min_interval_scale: f64,
    pub max_interval_scale: f64,
    pub max_hint_level: i32,
    pub high_fatigue: f64,
    pub high_fatigue_max_batch: i32,
    pub high_fatigue_max_new_ratio: f64,
    pub force_break_fatigue: f64,
    pub low_attention: f64,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self {
            min_batch_size: 5,
            max_batch_size: 20,
            max_batch_step: 4,
            min_new_ratio: 0.0,
            max_new_ratio: 1.0,
            min_interval_scale: 0.5,
            max_interval_scale: 2.0,
            max_hint_level: 2,
            high_fatigue: 0.75,
            high_fatigue_max_batch: 8,
            high_fatigue_max_new_ratio: 0.2,
            force_break_fatigue: 0.9,
            low_attention: 0.3,
        }
    }
}

/// Versioned thresholds for cold start and guardrails.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyConfig {
    pub version: String,
    #[serde(default)]
    pub cold_start: ColdStartPolicy,
    #[serde(default)]
    pub guardrails: GuardrailPolicy,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            version: POLICY_VERSION.to_string(),
            cold_start: ColdStartPolicy::default(),
            guardrails: GuardrailPolicy::default(),
        }
    }
}

impl PolicyConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let policy: PolicyConfig = serde_json::from_str(raw)?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AmasError::Policy(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != POLICY_VERSION {
            return Err(AmasError::Policy(format!(
                "unsupported policy version {}",
                self.version
            )));
        }

        let cs = &self.cold_start;
        if cs.probe_actions.len() != COLD_START_PROBE_COUNT {
            return Err(AmasError::Policy(format!(
                "cold start needs exactly {COLD_START_PROBE_COUNT} probes, got {}",
                cs.probe_actions.len()
            )));
        }
        if cs.cautious_max_accuracy > cs.fast_min_accuracy {
            return Err(AmasError::Policy(
                "cautious accuracy ceiling above fast accuracy floor".to_string(),
            ));
        }
        if cs.explore_window == 0 || cs.min_explore_samples > cs.max_explore_samples {
            return Err(AmasError::Policy("invalid explore window".to_string()));
        }

        let g = &self.guardrails;
        if g.min_batch_size < 5 || g.max_batch_size > 20 || g.min_batch_size > g.max_batch_size {
            return Err(AmasError::Policy(format!(
                "batch bounds [{}, {}] outside [5, 20]",
                g.min_batch_size, g.max_batch_size
            )));
        }
        if g.min_new_ratio < 0.0 || g.max_new_ratio > 1.0 || g.min_new_ratio > g.max_new_ratio {
            return Err(AmasError::Policy("new ratio bounds outside [0, 1]".to_string()));
        }
        if g.min_interval_scale <= 0.0 || g.min_interval_scale > g.max_interval_scale {
            return Err(AmasError::Policy("interval scale must stay positive".to_string()));
        }
        if g.max_hint_level < 0 || g.max_batch_step <= 0 {
            return Err(AmasError::Policy("invalid hint or step bound".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AMASConfig {
    pub perception: PerceptionConfig,
    pub attention_weights: AttentionWeights,
    pub fatigue: FatigueParams,
    pub motivation: MotivationParams,
    pub cognitive: CognitiveParams,
    pub trend: TrendParams,
    pub bandit: BanditConfig,
    pub reward: RewardConfig,
    pub ensemble: EnsembleConfig,
    pub thompson_context: ThompsonContextConfig,
    pub decision_model: DecisionModelKind,
    pub cache: CacheConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub timeouts: TimeoutConfig,
    pub decay: DecayConfig,
    pub policy: PolicyConfig,
    pub attention_smoothing: f64,
    pub confidence_step: f64,
    pub feature_window: usize,
}

impl Default for AMASConfig {
    fn default() -> Self {
        Self {
            perception: PerceptionConfig::default(),
            attention_weights: AttentionWeights::default(),
            fatigue: FatigueParams::default(),
            motivation: MotivationParams::default(),
            cognitive: CognitiveParams::default(),
            trend: TrendParams::default(),
            bandit: BanditConfig::default(),
            reward: RewardConfig::default(),
            ensemble: EnsembleConfig::default(),
            thompson_context: ThompsonContextConfig::default(),
            decision_model: DecisionModelKind::default(),
            cache: CacheConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            timeouts: TimeoutConfig::default(),
            decay: DecayConfig::default(),
            policy: PolicyConfig::default(),
            attention_smoothing: 0.3,
            confidence_step: 0.02,
            feature_window: 20,
        }
    }
}

impl AMASConfig {
    /// Environment-derived timeouts, optional policy file, then `AMAS_*` overrides.
    pub fn from_settings(settings: &Config) -> Result<Self> {
        let mut config = Self {
            timeouts: TimeoutConfig::for_environment(settings.environment),
            ..Self::default()
        };
        if let Some(path) = settings.policy_path.as_ref() {
            config.policy = PolicyConfig::from_json_file(path)?;
            tracing::info!(
                path = %path.display(),
                version = %config.policy.version,
                "AMAS policy loaded"
            );
        }
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("AMAS_DECISION_MODEL") {
            match DecisionModelKind::parse(&val) {
                Some(kind) => self.decision_model = kind,
                None => tracing::warn!(value = %val, "unknown AMAS_DECISION_MODEL, keeping default"),
            }
        }
        if let Some(alpha) = env_parse::<f64>("AMAS_BANDIT_ALPHA") {
            self.bandit.alpha = alpha.max(0.0);
        }
        if let Some(capacity) = env_parse::<usize>("AMAS_CACHE_CAPACITY") {
            self.cache.capacity = capacity.max(1);
        }
        if let Some(ttl_secs) = env_parse::<i64>("AMAS_CACHE_TTL_SECS") {
            self.cache.ttl_ms = ttl_secs.max(1) * 1000;
        }
        if let Some(ms) = env_parse::<u64>("AMAS_EVENT_TIMEOUT_MS") {
            self.timeouts.event_ms = ms.max(1);
        }
        if let Some(ms) = env_parse::<u64>("AMAS_LOCK_TIMEOUT_MS") {
            self.timeouts.lock_ms = ms.max(1);
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
