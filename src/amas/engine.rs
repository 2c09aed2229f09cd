use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::amas::config::AMASConfig;
use crate::amas::decision::linucb::pad_or_truncate;
use crate::amas::decision::{
    apply_guardrails, ActionSpace, ColdStartManager, GuardrailRule, LinUCBModel, Selection,
};
use crate::amas::error::{AmasError, Result};
use crate::amas::isolation::{IsolationManager, MemoryStats, SweepReport, UserModels};
use crate::amas::modeling::features::hour_of_day;
use crate::amas::modeling::{
    apply_decay, context_vector, FeatureExtractor, StateEstimator, WindowFeatureExtractor,
};
use crate::amas::persistence::{
    DecisionTrace, DecisionTracer, InMemoryModelRepository, InMemoryStateRepository,
    ModelRepository, NoopDecisionTracer, StateRepository,
};
use crate::amas::resilience::{
    execute_with_timeout, fallback, CancellationToken, CircuitBreaker, CircuitState,
    FallbackContext,
};
use crate::amas::types::*;
use crate::config::Config;

/// The adaptive decision engine: one call per learning event.
pub struct AMASEngine {
    config: Arc<AMASConfig>,
    isolation: Arc<IsolationManager>,
    breaker: CircuitBreaker,
    estimator: StateEstimator,
    extractor: Arc<dyn FeatureExtractor>,
    state_repo: Arc<dyn StateRepository>,
    model_repo: Arc<dyn ModelRepository>,
    tracer: Arc<dyn DecisionTracer>,
    action_space: ActionSpace,
}

impl AMASEngine {
    /// An engine backed by in-memory repositories and no tracing sink.
    pub fn new(config: AMASConfig) -> Self {
        let config = Arc::new(config);
        Self {
            isolation: Arc::new(IsolationManager::new(config.clone())),
            breaker: CircuitBreaker::new(config.circuit_breaker.clone()),
            estimator: StateEstimator::new(&config),
            extractor: Arc::new(WindowFeatureExtractor::new(config.perception.clone())),
            state_repo: Arc::new(InMemoryStateRepository::new()),
            model_repo: Arc::new(InMemoryModelRepository::new()),
            tracer: Arc::new(NoopDecisionTracer),
            action_space: ActionSpace::standard(),
            config,
        }
    }

    /// Configuration from the process settings: environment timeouts, policy file, overrides.
    pub fn from_settings(settings: &Config) -> Result<Self> {
        Ok(Self::new(AMASConfig::from_settings(settings)?))
    }

    pub fn with_repositories(
        mut self,
        state_repo: Arc<dyn StateRepository>,
        model_repo: Arc<dyn ModelRepository>,
    ) -> Self {
        self.state_repo = state_repo;
        self.model_repo = model_repo;
        self
    }

    pub fn with_tracer(mut self, tracer: Arc<dyn DecisionTracer>) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn FeatureExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_action_space(mut self, action_space: ActionSpace) -> Self {
        self.action_space = action_space;
        self
    }

    pub fn config(&self) -> &AMASConfig {
        &self.config
    }

    /// Never fails: every fault degrades to a fallback strategy.
    pub async fn process_event(
        &self,
        user_id: &str,
        event: RawEvent,
        options: ProcessOptions,
    ) -> ProcessResult {
        if !self.breaker.can_execute() {
            return self.fallback_result(user_id, &event, FallbackReason::CircuitOpen);
        }

        if let Err(reason) = event.validate() {
            tracing::warn!(user_id, %reason, "rejected malformed event");
            self.breaker.record_neutral();
            return self.fallback_result(user_id, &event, FallbackReason::MissingFeatures);
        }

        let started = Instant::now();
        let lock_timeout = self.config.timeouts.lock();
        let outcome = execute_with_timeout(
            self.config.timeouts.event(),
            options.cancellation.as_ref(),
            |token| {
                self.isolation.with_user_lock(
                    user_id,
                    lock_timeout,
                    self.run_pipeline(user_id, &event, &options, token, started),
                )
            },
        )
        .await;

        match outcome {
            Ok(result) => {
                self.breaker.record_success();
                result
            }
            Err(err) => {
                let reason = match &err {
                    AmasError::InvalidEvent(_) => {
                        self.breaker.record_neutral();
                        FallbackReason::MissingFeatures
                    }
                    AmasError::LockTimeout { .. } | AmasError::Cancelled => {
                        self.breaker.record_neutral();
                        FallbackReason::DegradedState
                    }
                    AmasError::CircuitOpen => FallbackReason::CircuitOpen,
                    AmasError::ModelNotFound(_) => {
                        self.breaker.record_neutral();
                        FallbackReason::ModelUnavailable
                    }
                    AmasError::Timeout(_) => {
                        self.breaker.record_failure("timeout");
                        FallbackReason::Timeout
                    }
                    other => {
                        self.breaker.record_failure(&other.to_string());
                        FallbackReason::Exception
                    }
                };
                tracing::warn!(user_id, error = %err, reason = reason.as_str(), "event pipeline failed");
                self.fallback_result(user_id, &event, reason)
            }
        }
    }

    async fn run_pipeline(
        &self,
        user_id: &str,
        event: &RawEvent,
        options: &ProcessOptions,
        token: CancellationToken,
        started: Instant,
    ) -> Result<ProcessResult> {
        let config = &self.config;
        let (mut models, _) = self.load_models(user_id).await?;
        token.check()?;

        // A reset user starts exactly like a new one: nothing to decay.
        let prev = match models.state.as_ref() {
            Some(stored) if !models.is_untouched() => {
                apply_decay(stored, event.timestamp, &config.decay)
            }
            _ => UserState::new_at(event.timestamp),
        };

        if event.response_time > config.perception.anomaly_response_time {
            tracing::info!(
                user_id,
                response_time = event.response_time,
                "anomalous response time, skipping model updates"
            );
            return Ok(self.passthrough_result(&models, prev, event.timestamp));
        }

        let features = self.extractor.extract(&models.window, event);
        let recent_error_rate = models.window.error_rate_with(event);
        let (mut state, sub_models) =
            self.estimator
                .estimate(&prev, &features, event, recent_error_rate, &models.sub_models);
        let context = context_vector(&features, &state, event);
        let reward = self.compute_reward(event, &state);

        // Credit the strategy this event was answered under.
        let executed = models
            .last_strategy
            .clone()
            .or_else(|| models.cold_start.current_action())
            .unwrap_or_default();
        if !options.skip_update {
            let x = models.bandit.build_input(&context, &executed);
            models.bandit.update(&x, reward.value);
            models.decision.update(&prev, &executed, reward.value);
            if !models.cold_start.is_complete() {
                models
                    .cold_start
                    .update(event.is_correct, event.response_time, recent_error_rate);
            }
        }
        token.check()?;

        let current = models.last_strategy.clone().unwrap_or_default();
        let phase = models.cold_start.phase();
        let selection = if phase == ColdStartPhase::Normal {
            models.decision.select(
                &mut models.bandit,
                &state,
                &context,
                &self.action_space,
                &current,
            )
        } else {
            models.cold_start.current_action().map(|strategy| Selection {
                strategy,
                confidence: 1.0,
                source: "coldstart",
                votes: Vec::new(),
            })
        };
        let selection = selection.ok_or_else(|| AmasError::ModelNotFound(user_id.to_string()))?;

        // Probes are delivered as issued; the step limit only applies to learned decisions.
        let previous = match phase {
            ColdStartPhase::Normal => models.last_strategy.as_ref(),
            _ => None,
        };
        let guarded = apply_guardrails(
            &config.policy.guardrails,
            &selection.strategy,
            previous,
            &state,
        );

        state.cold_start = Some(models.cold_start.state().clone());
        let x = models.bandit.build_input(&context, &guarded.strategy);
        let feature_vector = FeatureVector::with_ts(
            x,
            LinUCBModel::input_labels(&context, models.bandit.context_dim()),
            event.timestamp,
        );
        let explanation = build_explanation(&state, &current, &guarded.strategy, &guarded.applied);

        models.state = Some(state.clone());
        models.sub_models = sub_models;
        models.window.push(event.clone());
        models.last_strategy = Some(guarded.strategy.clone());
        models.interaction_count += 1;

        // Past this point a deadline no longer interrupts the writes.
        token.begin_commit()?;
        self.state_repo.save(user_id, &state).await?;
        self.model_repo
            .save(user_id, &models.bandit.to_snapshot())
            .await?;
        self.isolation.commit_user_models(user_id, models);

        tracing::debug!(
            user_id,
            phase = phase.as_str(),
            source = selection.source,
            reward = reward.value,
            should_break = guarded.should_break,
            "event processed"
        );

        let mut trace = DecisionTrace::new(
            user_id,
            event.timestamp,
            current_phase(&state),
            guarded.strategy.clone(),
        );
        trace.decision_source = selection.source.to_string();
        trace.reward = reward.value;
        trace.votes = selection.votes;
        trace.guardrails = guarded.applied.iter().map(|r| r.as_str().to_string()).collect();
        trace.duration_ms = started.elapsed().as_millis() as u64;
        self.emit_trace(trace);

        Ok(ProcessResult {
            cold_start_phase: current_phase(&state),
            action: Action::from(selection.strategy),
            strategy: guarded.strategy,
            state,
            reward,
            explanation,
            should_break: guarded.should_break,
            feature_vector: Some(feature_vector),
            fallback_reason: None,
        })
    }

    /// Cached models, else the repositories, else fresh templates.
    /// The flag reports whether anything was known about the user.
    async fn load_models(&self, user_id: &str) -> Result<(UserModels, bool)> {
        if let Some(models) = self.isolation.get_user_models(user_id) {
            return Ok((models, true));
        }

        let state = self.state_repo.load(user_id).await?;
        let snapshot = self.model_repo.load(user_id).await?;
        let known = state.is_some() || snapshot.is_some();

        let mut models = self
            .isolation
            .templates()
            .instantiate(state.as_ref().and_then(|s| s.cold_start.clone()));
        if let Some(snapshot) = snapshot {
            match LinUCBModel::from_snapshot(snapshot) {
                Ok(bandit) => {
                    models.interaction_count = bandit.update_count();
                    models.bandit = bandit;
                }
                Err(err) => {
                    tracing::warn!(user_id, error = %err, "discarding unusable bandit snapshot");
                }
            }
        }
        models.state = state;
        Ok((models, known))
    }

    fn passthrough_result(&self, models: &UserModels, state: UserState, ts: i64) -> ProcessResult {
        let strategy = models
            .last_strategy
            .clone()
            .or_else(|| models.cold_start.current_action())
            .unwrap_or_default();
        ProcessResult {
            action: Action::from(strategy.clone()),
            explanation: DecisionExplanation {
                text: "Response time looked idle; keeping the current strategy".to_string(),
                ..Default::default()
            },
            strategy,
            cold_start_phase: models.cold_start.phase(),
            state,
            reward: Reward::new(0.0, "anomaly", ts),
            should_break: false,
            feature_vector: None,
            fallback_reason: None,
        }
    }

    fn fallback_result(&self, user_id: &str, event: &RawEvent, reason: FallbackReason) -> ProcessResult {
        let ts = if event.timestamp > 0 {
            event.timestamp
        } else {
            chrono::Utc::now().timestamp_millis()
        };
        let cached = self.isolation.peek(user_id);
        let (state, ctx, phase) = match cached.as_ref() {
            Some(models) => (
                models.state.clone().unwrap_or_else(|| UserState::new_at(ts)),
                FallbackContext {
                    interaction_count: models.interaction_count,
                    recent_error_rate: models.recent_error_rate(),
                    hour: hour_of_day(ts),
                },
                models.cold_start.phase(),
            ),
            None => (
                UserState::new_at(ts),
                FallbackContext {
                    hour: hour_of_day(ts),
                    ..Default::default()
                },
                ColdStartPhase::Classify,
            ),
        };

        let fb = fallback(&state, reason, &ctx, &self.config.policy.guardrails);
        tracing::warn!(
            user_id,
            reason = reason.as_str(),
            rules = fb.applied.len(),
            "serving fallback strategy"
        );

        ProcessResult {
            action: Action::from(fb.strategy.clone()),
            strategy: fb.strategy,
            state,
            reward: Reward::new(0.0, reason.as_str(), ts),
            explanation: DecisionExplanation {
                text: fb.explanation,
                ..Default::default()
            },
            should_break: fb.should_break && reason != FallbackReason::CircuitOpen,
            feature_vector: None,
            cold_start_phase: phase,
            fallback_reason: Some(reason),
        }
    }

    fn compute_reward(&self, event: &RawEvent, state: &UserState) -> Reward {
        let weights = &self.config.reward;
        let accuracy = if event.is_correct { 1.0 } else { 0.0 };
        let max_rt = self.config.perception.max_response_time.max(1) as f64;
        let speed = 1.0 - (event.response_time as f64 / max_rt).min(1.0);

        let value = weights.accuracy_weight * accuracy
            + weights.speed_weight * speed
            + weights.stability_weight * state.cognitive.stability
            + weights.retention_weight * state.cognitive.mem;
        let value = (value * 2.0 - 1.0).clamp(-1.0, 1.0);

        let reason = if event.is_correct {
            if speed > 0.7 {
                "correct_fast"
            } else {
                "correct"
            }
        } else if event.hint_used {
            "incorrect_with_hint"
        } else {
            "incorrect"
        };
        Reward::new(value, reason, event.timestamp)
    }

    fn emit_trace(&self, trace: DecisionTrace) {
        let tracer = self.tracer.clone();
        tokio::spawn(async move {
            let trace_id = trace.trace_id;
            if let Err(err) = tracer.record(trace).await {
                tracing::warn!(%trace_id, error = %err, "decision trace dropped");
            }
        });
    }

    /// The stored state, from cache or the state repository.
    pub async fn get_state(&self, user_id: &str) -> Option<UserState> {
        if let Some(models) = self.isolation.peek(user_id) {
            if models.state.is_some() {
                return models.state;
            }
        }
        match self.state_repo.load(user_id).await {
            Ok(state) => state,
            Err(err) => {
                tracing::warn!(user_id, error = %err, "failed to load user state");
                None
            }
        }
    }

    /// Drops everything learned about the user and persists fresh defaults.
    pub async fn reset_user(&self, user_id: &str) -> Result<()> {
        self.isolation
            .with_user_lock(user_id, self.config.timeouts.lock(), async {
                self.isolation.remove(user_id);

                let mut models = self.isolation.templates().instantiate(None);
                let mut state = UserState::new_at(chrono::Utc::now().timestamp_millis());
                state.cold_start = Some(models.cold_start.state().clone());
                models.state = Some(state.clone());

                self.state_repo.save(user_id, &state).await?;
                self.model_repo
                    .save(user_id, &models.bandit.to_snapshot())
                    .await?;
                self.isolation.commit_user_models(user_id, models);
                tracing::info!(user_id, "user models reset");
                Ok(())
            })
            .await
    }

    /// Credits `reward` to the feature vector of an earlier decision.
    pub async fn apply_delayed_reward_update(
        &self,
        user_id: &str,
        feature_vector: &FeatureVector,
        reward: f64,
    ) -> DelayedRewardResult {
        if !reward.is_finite() {
            return DelayedRewardResult::failed(format!("reward is not finite: {reward}"));
        }

        let lock_timeout = self.config.timeouts.lock();
        let outcome = execute_with_timeout(self.config.timeouts.delayed_reward(), None, |token| {
            self.isolation.with_user_lock(user_id, lock_timeout, async move {
                let (mut models, known) = self.load_models(user_id).await?;
                if !known {
                    return Err(AmasError::ModelNotFound(user_id.to_string()));
                }
                token.check()?;

                let dim = models.bandit.dimension();
                if feature_vector.dim() != dim {
                    tracing::debug!(
                        user_id,
                        got = feature_vector.dim(),
                        expected = dim,
                        "adapting delayed reward feature vector"
                    );
                }
                let x = pad_or_truncate(&feature_vector.values, dim);
                models.bandit.update(&x, reward);

                token.begin_commit()?;
                self.model_repo
                    .save(user_id, &models.bandit.to_snapshot())
                    .await?;
                self.isolation.commit_user_models(user_id, models);
                Ok(())
            })
        })
        .await;

        match outcome {
            Ok(()) => DelayedRewardResult::ok(),
            Err(err) => {
                tracing::warn!(user_id, error = %err, "delayed reward not applied");
                DelayedRewardResult::failed(err.to_string())
            }
        }
    }

    pub async fn get_cold_start_phase(&self, user_id: &str) -> ColdStartPhase {
        if let Some(models) = self.isolation.peek(user_id) {
            return models.cold_start.phase();
        }
        self.get_state(user_id)
            .await
            .and_then(|s| s.cold_start)
            .map(|cs| ColdStartManager::from_state(self.config.policy.cold_start.clone(), cs).phase())
            .unwrap_or_default()
    }

    pub fn memory_stats(&self) -> MemoryStats {
        self.isolation.memory_stats()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn force_circuit_open(&self, forced: bool) {
        self.breaker.force_open(forced);
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn sweep_now(&self) -> SweepReport {
        self.isolation.sweep(chrono::Utc::now().timestamp_millis())
    }

    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let interval = Duration::from_millis(self.config.cache.sweep_interval_ms);
        self.isolation.spawn_sweeper(interval)
    }
}

impl Default for AMASEngine {
    fn default() -> Self {
        Self::new(AMASConfig::default())
    }
}

fn current_phase(state: &UserState) -> ColdStartPhase {
    state
        .cold_start
        .as_ref()
        .map(|cs| cs.phase)
        .unwrap_or_default()
}

fn build_explanation(
    state: &UserState,
    previous: &StrategyParams,
    strategy: &StrategyParams,
    applied: &[GuardrailRule],
) -> DecisionExplanation {
    let mut factors = Vec::new();

    if state.fatigue > 0.5 {
        factors.push(DecisionFactor {
            name: "fatigue".to_string(),
            value: state.fatigue,
            impact: "smaller batches".to_string(),
            percentage: (state.fatigue - 0.5) * 100.0,
        });
    }
    if state.attention < 0.5 {
        factors.push(DecisionFactor {
            name: "attention".to_string(),
            value: state.attention,
            impact: "more hints".to_string(),
            percentage: (0.5 - state.attention) * 100.0,
        });
    }
    if state.motivation < 0.0 {
        factors.push(DecisionFactor {
            name: "motivation".to_string(),
            value: state.motivation,
            impact: "easier items".to_string(),
            percentage: state.motivation.abs() * 100.0,
        });
    }

    let mut changes = Vec::new();
    if previous.difficulty != strategy.difficulty {
        changes.push(format!(
            "difficulty: {} -> {}",
            previous.difficulty.as_str(),
            strategy.difficulty.as_str()
        ));
    } else {
        changes.push(format!("difficulty: {}", strategy.difficulty.as_str()));
    }
    if previous.batch_size != strategy.batch_size {
        changes.push(format!(
            "batch: {} -> {}",
            previous.batch_size, strategy.batch_size
        ));
    } else {
        changes.push(format!("batch: {}", strategy.batch_size));
    }
    if (previous.new_ratio - strategy.new_ratio).abs() > f64::EPSILON {
        changes.push(format!(
            "new words: {:.0}% -> {:.0}%",
            previous.new_ratio * 100.0,
            strategy.new_ratio * 100.0
        ));
    } else {
        changes.push(format!("new words: {:.0}%", strategy.new_ratio * 100.0));
    }
    changes.extend(applied.iter().map(|r| format!("guardrail: {}", r.as_str())));

    let text = if factors.is_empty() {
        "Learner state looks good, keeping the strategy on track".to_string()
    } else {
        let names: Vec<&str> = factors.iter().map(|f| f.name.as_str()).collect();
        format!("Strategy adjusted for {}", names.join(", "))
    };

    DecisionExplanation {
        factors,
        changes,
        text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_700_000_000_000;

    fn event(correct: bool, rt: i64, ts: i64) -> RawEvent {
        RawEvent {
            is_correct: correct,
            response_time: rt,
            timestamp: ts,
            ..Default::default()
        }
    }

    #[test]
    fn reward_favours_fast_correct_answers() {
        let engine = AMASEngine::default();
        let state = UserState::new_at(T0);
        let fast = engine.compute_reward(&event(true, 1000, T0), &state);
        let slow_wrong = engine.compute_reward(&event(false, 29000, T0), &state);
        assert!(fast.value > slow_wrong.value);
        assert_eq!(fast.reason, "correct_fast");
        assert!((-1.0..=1.0).contains(&slow_wrong.value));
    }

    #[tokio::test]
    async fn first_event_returns_first_probe_after_update() {
        let engine = AMASEngine::default();
        let result = engine
            .process_event("u1", event(true, 1500, T0), ProcessOptions::default())
            .await;
        assert!(result.fallback_reason.is_none());
        assert_eq!(result.cold_start_phase, ColdStartPhase::Classify);
        assert_eq!(
            result.state.cold_start.as_ref().map(|cs| cs.probe_index),
            Some(1)
        );
        assert_eq!(result.feature_vector.as_ref().map(|fv| fv.dim()), Some(15));
    }

    #[tokio::test]
    async fn anomalous_response_time_leaves_models_alone() {
        let engine = AMASEngine::default();
        let result = engine
            .process_event("u1", event(true, 400_000, T0), ProcessOptions::default())
            .await;
        assert_eq!(result.reward.reason, "anomaly");
        assert!(result.fallback_reason.is_none());
        assert_eq!(engine.memory_stats().entries, 0);
    }

    #[tokio::test]
    async fn malformed_event_yields_missing_features() {
        let engine = AMASEngine::default();
        let result = engine
            .process_event("u1", event(true, -5, T0), ProcessOptions::default())
            .await;
        assert_eq!(result.fallback_reason, Some(FallbackReason::MissingFeatures));
        assert_eq!(engine.circuit_breaker().window_failures(), 0);
    }

    #[tokio::test]
    async fn cancelled_caller_gets_degraded_fallback() {
        let engine = AMASEngine::default();
        let token = CancellationToken::new();
        token.cancel();
        let result = engine
            .process_event(
                "u1",
                event(true, 1500, T0),
                ProcessOptions {
                    cancellation: Some(token),
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(result.fallback_reason, Some(FallbackReason::DegradedState));
        assert!(engine.get_state("u1").await.is_none());
    }

    #[test]
    fn production_settings_tighten_timeouts() {
        let settings = Config {
            environment: crate::config::Environment::Production,
            ..Default::default()
        };
        let engine = AMASEngine::from_settings(&settings).unwrap();
        assert_eq!(engine.config().timeouts.event_ms, 500);
        assert_eq!(engine.config().timeouts.lock_ms, 300);
    }

    #[test]
    fn explanation_lists_changes_and_guardrails() {
        let mut state = UserState::new_at(T0);
        state.fatigue = 0.8;
        let previous = StrategyParams::default();
        let next = StrategyParams {
            batch_size: 5,
            ..Default::default()
        };
        let exp = build_explanation(&state, &previous, &next, &[GuardrailRule::HighFatigue]);
        assert_eq!(exp.factors[0].name, "fatigue");
        assert!(exp.changes.contains(&"batch: 8 -> 5".to_string()));
        assert!(exp.changes.iter().any(|c| c.starts_with("guardrail:")));
    }
}
