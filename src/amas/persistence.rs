use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::{BoxFuture, FutureExt};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::amas::decision::{BanditModel, Vote};
use crate::amas::error::Result;
use crate::amas::types::{ColdStartPhase, FallbackReason, StrategyParams, UserState};

/// Learner state storage. `Ok(None)` means the user has never been seen.
pub trait StateRepository: Send + Sync {
    fn load<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<Option<UserState>>>;
    fn save<'a>(&'a self, user_id: &'a str, state: &'a UserState) -> BoxFuture<'a, Result<()>>;
}

/// Ridge bandit storage. `Ok(None)` means no model was trained yet.
pub trait ModelRepository: Send + Sync {
    fn load<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<Option<BanditModel>>>;
    fn save<'a>(&'a self, user_id: &'a str, model: &'a BanditModel) -> BoxFuture<'a, Result<()>>;
}

#[derive(Debug, Default)]
pub struct InMemoryStateRepository {
    states: RwLock<HashMap<String, UserState>>,
    saves: AtomicU64,
}

impl InMemoryStateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }

    pub fn get(&self, user_id: &str) -> Option<UserState> {
        self.states.read().get(user_id).cloned()
    }

    pub fn insert(&self, user_id: &str, state: UserState) {
        self.states.write().insert(user_id.to_string(), state);
    }

    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.read().is_empty()
    }
}

impl StateRepository for InMemoryStateRepository {
    fn load<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<Option<UserState>>> {
        let state = self.get(user_id);
        async move { Ok(state) }.boxed()
    }

    fn save<'a>(&'a self, user_id: &'a str, state: &'a UserState) -> BoxFuture<'a, Result<()>> {
        async move {
            self.insert(user_id, state.clone());
            self.saves.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        .boxed()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryModelRepository {
    models: RwLock<HashMap<String, BanditModel>>,
    saves: AtomicU64,
}

impl InMemoryModelRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }

    pub fn get(&self, user_id: &str) -> Option<BanditModel> {
        self.models.read().get(user_id).cloned()
    }

    pub fn insert(&self, user_id: &str, model: BanditModel) {
        self.models.write().insert(user_id.to_string(), model);
    }
}

impl ModelRepository for InMemoryModelRepository {
    fn load<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<Option<BanditModel>>> {
        let model = self.get(user_id);
        async move { Ok(model) }.boxed()
    }

    fn save<'a>(&'a self, user_id: &'a str, model: &'a BanditModel) -> BoxFuture<'a, Result<()>> {
        async move {
            self.insert(user_id, model.clone());
            self.saves.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        .boxed()
    }
}

/// One decision, as recorded for offline analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionTrace {
    pub trace_id: Uuid,
    pub user_id: String,
    pub ts: i64,
    pub phase: ColdStartPhase,
    pub decision_source: String,
    pub strategy: StrategyParams,
    pub reward: f64,
    pub votes: Vec<Vote>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<FallbackReason>,
    pub guardrails: Vec<String>,
    pub duration_ms: u64,
}

impl DecisionTrace {
    pub fn new(user_id: &str, ts: i64, phase: ColdStartPhase, strategy: StrategyParams) -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            ts,
            phase,
            decision_source: String::new(),
            strategy,
            reward: 0.0,
            votes: Vec::new(),
            fallback_reason: None,
            guardrails: Vec::new(),
            duration_ms: 0,
        }
    }
}

/// Best-effort sink for decision traces. Failures never reach the caller of the engine.
pub trait DecisionTracer: Send + Sync {
    fn record(&self, trace: DecisionTrace) -> BoxFuture<'_, Result<()>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDecisionTracer;

impl DecisionTracer for NoopDecisionTracer {
    fn record(&self, _trace: DecisionTrace) -> BoxFuture<'_, Result<()>> {
        async { Ok(()) }.boxed()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogDecisionTracer;

impl DecisionTracer for LogDecisionTracer {
    fn record(&self, trace: DecisionTrace) -> BoxFuture<'_, Result<()>> {
        async move {
            let payload = serde_json::to_string(&trace)?;
            tracing::info!(
                target: "amas::trace",
                trace_id = %trace.trace_id,
                user_id = %trace.user_id,
                phase = trace.phase.as_str(),
                fallback = trace.fallback_reason.map(|r| r.as_str()).unwrap_or("none"),
                duration_ms = trace.duration_ms,
                payload = %payload,
                "decision"
            );
            Ok(())
        }
        .boxed()
    }
}

#[derive(Debug, Default)]
pub struct MemoryDecisionTracer {
    traces: Mutex<Vec<DecisionTrace>>,
}

impl MemoryDecisionTracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn traces(&self) -> Vec<DecisionTrace> {
        self.traces.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.traces.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.lock().is_empty()
    }
}

impl DecisionTracer for MemoryDecisionTracer {
    fn record(&self, trace: DecisionTrace) -> BoxFuture<'_, Result<()>> {
        async move {
            self.traces.lock().push(trace);
            Ok(())
        }
        .boxed()
    }
}
