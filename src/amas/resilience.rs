use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, Notify};

use crate::amas::config::{CircuitBreakerConfig, GuardrailPolicy};
use crate::amas::decision::guardrails::{apply_guardrails, GuardrailRule};
use crate::amas::error::{AmasError, Result};
use crate::amas::types::{DifficultyLevel, FallbackReason, StrategyParams, UserState};

const TRANSITION_CHANNEL_CAPACITY: usize = 64;

const TOKEN_ACTIVE: u8 = 0;
const TOKEN_CANCELLED: u8 = 1;
const TOKEN_COMMITTING: u8 = 2;

/// One-shot cancellation flag shared by every step of a request.
///
/// A request that has entered its commit step can no longer be cancelled:
/// either every write happens or none does.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

#[derive(Debug, Default)]
struct TokenInner {
    state: AtomicU8,
    notify: Notify,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// False when the work already entered its commit step.
    pub fn cancel(&self) -> bool {
        match self.inner.state.compare_exchange(
            TOKEN_ACTIVE,
            TOKEN_CANCELLED,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {
                self.inner.notify.notify_waiters();
                true
            }
            Err(current) => current == TOKEN_CANCELLED,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.state.load(Ordering::SeqCst) == TOKEN_CANCELLED
    }

    pub fn is_committing(&self) -> bool {
        self.inner.state.load(Ordering::SeqCst) == TOKEN_COMMITTING
    }

    /// `Err(Cancelled)` once the flag is set.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(AmasError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Enters the commit step. Fails if cancellation won the race.
    pub fn begin_commit(&self) -> Result<()> {
        match self.inner.state.compare_exchange(
            TOKEN_ACTIVE,
            TOKEN_COMMITTING,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => Ok(()),
            Err(TOKEN_COMMITTING) => Ok(()),
            Err(_) => Err(AmasError::Cancelled),
        }
    }

    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Runs `f` with a fresh token under a deadline. On expiry the token is
/// cancelled and the work future is dropped; a cancelled `parent` aborts too.
/// Work that already entered its commit step is driven to completion instead.
pub async fn execute_with_timeout<F, Fut, T>(
    timeout: Duration,
    parent: Option<&CancellationToken>,
    f: F,
) -> Result<T>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if let Some(parent) = parent {
        parent.check()?;
    }

    let token = CancellationToken::new();
    let work = f(token.clone());
    tokio::pin!(work);
    let deadline = tokio::time::sleep(timeout);
    let parent_cancelled = async {
        match parent {
            Some(parent) => parent.cancelled().await,
            None => std::future::pending::<()>().await,
        }
    };

    let interrupted = tokio::select! {
        biased;
        result = &mut work => return result,
        _ = deadline => AmasError::Timeout(timeout),
        _ = parent_cancelled => AmasError::Cancelled,
    };

    if token.cancel() {
        return Err(interrupted);
    }
    tracing::debug!(error = %interrupted, "deadline reached during commit, finishing writes");
    work.await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitTransition {
    pub from: CircuitState,
    pub to: CircuitState,
    pub reason: String,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    half_open_successes: u32,
    /// Start of the single request admitted while half-open.
    trial_started: Option<Instant>,
}

/// Rolling-window circuit breaker over pipeline outcomes.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    forced_open: AtomicBool,
    transitions: broadcast::Sender<CircuitTransition>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let (transitions, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        let window_size = config.window_size.max(1);
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                window: VecDeque::with_capacity(window_size),
                opened_at: None,
                half_open_successes: 0,
                trial_started: None,
            }),
            forced_open: AtomicBool::new(false),
            transitions,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CircuitTransition> {
        self.transitions.subscribe()
    }

    pub fn state(&self) -> CircuitState {
        if self.forced_open.load(Ordering::SeqCst) {
            return CircuitState::Open;
        }
        self.inner.lock().state
    }

    pub fn is_forced_open(&self) -> bool {
        self.forced_open.load(Ordering::SeqCst)
    }

    pub fn force_open(&self, forced: bool) {
        let was = self.forced_open.swap(forced, Ordering::SeqCst);
        if was != forced {
            tracing::warn!(forced, "circuit breaker override changed");
        }
    }

    /// Moves an expired open circuit to half-open. While half-open only one
    /// trial request runs at a time; a trial that never reports back is
    /// replaced after another open duration.
    pub fn can_execute(&self) -> bool {
        if self.forced_open.load(Ordering::SeqCst) {
            return false;
        }

        let open_for = Duration::from_millis(self.config.open_duration_ms);
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                let admit = inner
                    .trial_started
                    .map_or(true, |at| at.elapsed() >= open_for);
                if admit {
                    inner.trial_started = Some(Instant::now());
                }
                admit
            }
            CircuitState::Open => {
                let expired = inner
                    .opened_at
                    .map(|at| at.elapsed() >= open_for)
                    .unwrap_or(true);
                if expired {
                    inner.half_open_successes = 0;
                    inner.trial_started = Some(Instant::now());
                    self.transition(&mut inner, CircuitState::HalfOpen, "open duration elapsed");
                }
                expired
            }
        }
    }

    /// Ends a half-open trial whose outcome says nothing about the backend.
    pub fn record_neutral(&self) {
        self.inner.lock().trial_started = None;
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => self.push_outcome(&mut inner, true),
            CircuitState::HalfOpen => {
                inner.trial_started = None;
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.half_open_successes.max(1) {
                    inner.window.clear();
                    inner.opened_at = None;
                    self.transition(&mut inner, CircuitState::Closed, "probe requests succeeded");
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, reason: &str) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                self.push_outcome(&mut inner, false);
                let total = inner.window.len();
                let failures = inner.window.iter().filter(|ok| !**ok).count();
                let rate = failures as f64 / total.max(1) as f64;
                if failures as u32 >= self.config.failure_threshold
                    && rate >= self.config.failure_rate_threshold
                {
                    inner.opened_at = Some(Instant::now());
                    self.transition(&mut inner, CircuitState::Open, reason);
                }
            }
            CircuitState::HalfOpen => {
                inner.trial_started = None;
                inner.opened_at = Some(Instant::now());
                inner.half_open_successes = 0;
                self.transition(&mut inner, CircuitState::Open, reason);
            }
            CircuitState::Open => {}
        }
    }

    /// Failures currently counted in the rolling window.
    pub fn window_failures(&self) -> usize {
        self.inner.lock().window.iter().filter(|ok| !**ok).count()
    }

    fn push_outcome(&self, inner: &mut BreakerInner, ok: bool) {
        inner.window.push_back(ok);
        while inner.window.len() > self.config.window_size.max(1) {
            inner.window.pop_front();
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState, reason: &str) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;

        match to {
            CircuitState::Open => {
                tracing::warn!(from = from.as_str(), reason, "circuit breaker opened")
            }
            _ => tracing::info!(
                from = from.as_str(),
                to = to.as_str(),
                reason,
                "circuit breaker transition"
            ),
        }

        let _ = self.transitions.send(CircuitTransition {
            from,
            to,
            reason: reason.to_string(),
        });
    }
}

/// What the fallback rules know about the user beyond their state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FallbackContext {
    pub interaction_count: u64,
    pub recent_error_rate: f64,
    pub hour: u32,
}

impl Default for FallbackContext {
    fn default() -> Self {
        Self {
            interaction_count: 0,
            recent_error_rate: 0.0,
            hour: 12,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fallback {
    pub strategy: StrategyParams,
    pub should_break: bool,
    pub reason: FallbackReason,
    pub explanation: String,
    pub applied: Vec<GuardrailRule>,
}

/// A conservative strategy chosen without any learned model.
pub fn fallback(
    state: &UserState,
    reason: FallbackReason,
    ctx: &FallbackContext,
    policy: &GuardrailPolicy,
) -> Fallback {
    let mut strategy = StrategyParams::default();
    let mut notes = Vec::new();

    if ctx.interaction_count < 5 {
        strategy.difficulty = DifficultyLevel::Easy;
        strategy.hint_level = strategy.hint_level.max(1);
        notes.push("new learner");
    }

    if ctx.recent_error_rate > 0.5 {
        strategy.difficulty = DifficultyLevel::Easy;
        strategy.new_ratio = 0.1;
        strategy.batch_size = 5;
        strategy.hint_level = 2;
        strategy.interval_scale = 0.8;
        notes.push("high recent error rate");
    } else if ctx.recent_error_rate < 0.15 && ctx.interaction_count >= 20 {
        strategy.new_ratio = 0.3;
        strategy.batch_size = 12;
        notes.push("consistently accurate");
    }

    let late = ctx.hour >= 22 || ctx.hour < 6;
    if late || state.fatigue > 0.6 {
        strategy.batch_size = strategy.batch_size.min(5);
        strategy.new_ratio = strategy.new_ratio.min(0.1);
        notes.push(if late { "late hour" } else { "fatigue" });
    }

    if state.attention < 0.4 {
        strategy.hint_level = strategy.hint_level.max(1);
        notes.push("low attention");
    }

    let outcome = apply_guardrails(policy, &strategy, None, state);
    let mut explanation = format!("{}: using a safe default strategy", describe(reason));
    if !notes.is_empty() {
        explanation.push_str(" adjusted for ");
        explanation.push_str(&notes.join(", "));
    }

    Fallback {
        strategy: outcome.strategy,
        should_break: outcome.should_break,
        reason,
        explanation,
        applied: outcome.applied,
    }
}

fn describe(reason: FallbackReason) -> &'static str {
    match reason {
        FallbackReason::CircuitOpen => "Circuit breaker open",
        FallbackReason::Timeout => "Decision timed out",
        FallbackReason::Exception => "Decision failed",
        FallbackReason::DegradedState => "Engine degraded",
        FallbackReason::MissingFeatures => "Event features missing or invalid",
        FallbackReason::ModelUnavailable => "Model unavailable",
    }
}
