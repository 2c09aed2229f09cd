use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;

use crate::amas::config::AMASConfig;
use crate::amas::decision::{ColdStartManager, DecisionModel, LinUCBModel};
use crate::amas::error::{AmasError, Result};
use crate::amas::modeling::{EventWindow, SubModels};
use crate::amas::types::{ColdStartState, StrategyParams, UserState};

/// Entries are evicted down to this share of capacity once capacity is exceeded.
const LRU_TARGET_RATIO: f64 = 0.8;

/// Everything the engine keeps for one learner.
#[derive(Debug, Clone)]
pub struct UserModels {
    pub bandit: LinUCBModel,
    pub decision: DecisionModel,
    pub cold_start: ColdStartManager,
    pub sub_models: SubModels,
    pub window: EventWindow,
    pub state: Option<UserState>,
    /// The strategy most recently handed to the learner.
    pub last_strategy: Option<StrategyParams>,
    pub interaction_count: u64,
}

impl UserModels {
    pub fn recent_error_rate(&self) -> f64 {
        self.window.error_rate()
    }

    /// No event has reached these models yet, as for a new or freshly reset user.
    pub fn is_untouched(&self) -> bool {
        self.interaction_count == 0
            && self.window.is_empty()
            && self.cold_start.state().probe_index == 0
            && self.cold_start.state().results.is_empty()
    }
}

/// Builds fresh per-user model sets from the engine configuration.
#[derive(Debug, Clone)]
pub struct ModelTemplates {
    config: Arc<AMASConfig>,
}

impl ModelTemplates {
    pub fn new(config: Arc<AMASConfig>) -> Self {
        Self { config }
    }

    pub fn instantiate(&self, cold_start: Option<ColdStartState>) -> UserModels {
        let config = &self.config;
        let policy = config.policy.cold_start.clone();
        let cold_start = match cold_start {
            Some(state) => ColdStartManager::from_state(policy, state),
            None => ColdStartManager::new(policy),
        };

        UserModels {
            bandit: LinUCBModel::new(
                config.bandit.context_dim,
                config.bandit.alpha,
                config.bandit.lambda,
            ),
            decision: DecisionModel::from_config(config),
            cold_start,
            sub_models: SubModels::new(config),
            window: EventWindow::new(config.feature_window),
            state: None,
            last_strategy: None,
            interaction_count: 0,
        }
    }
}

#[derive(Debug)]
struct ModelEntry {
    models: UserModels,
    last_access: i64,
}

#[derive(Debug)]
struct UserLock {
    mutex: Arc<tokio::sync::Mutex<()>>,
    /// Holder plus waiters. Guarded by the lock map mutex.
    pending: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub expired: usize,
    pub evicted: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.expired + self.evicted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub entries: usize,
    pub lock_queues: usize,
    pub capacity: usize,
    pub utilization_percent: f64,
}

/// Per-user model cache plus the per-user FIFO lock queue.
///
/// The cache is never authoritative: a miss means "ask the repositories".
#[derive(Debug)]
pub struct IsolationManager {
    templates: ModelTemplates,
    capacity: usize,
    ttl_ms: i64,
    entries: RwLock<HashMap<String, ModelEntry>>,
    locks: Mutex<HashMap<String, Arc<Mutex<UserLock>>>>,
}

impl IsolationManager {
    pub fn new(config: Arc<AMASConfig>) -> Self {
        let capacity = config.cache.capacity.max(1);
        let ttl_ms = config.cache.ttl_ms.max(1);
        Self {
            templates: ModelTemplates::new(config),
            capacity,
            ttl_ms,
            entries: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn templates(&self) -> &ModelTemplates {
        &self.templates
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.entries.read().contains_key(user_id)
    }

    /// An owned copy of the cached models with their LRU timestamp refreshed.
    /// `None` means the caller must consult the repositories.
    pub fn get_user_models(&self, user_id: &str) -> Option<UserModels> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(user_id)?;
        entry.last_access = now_ms();
        Some(entry.models.clone())
    }

    /// Read-only copy without touching the LRU order.
    pub fn peek(&self, user_id: &str) -> Option<UserModels> {
        self.entries.read().get(user_id).map(|e| e.models.clone())
    }

    pub fn commit_user_models(&self, user_id: &str, models: UserModels) {
        let over_capacity = {
            let mut entries = self.entries.write();
            entries.insert(
                user_id.to_string(),
                ModelEntry {
                    models,
                    last_access: now_ms(),
                },
            );
            entries.len() > self.capacity
        };
        if over_capacity {
            let evicted = self.evict_lru();
            tracing::debug!(evicted, "model cache over capacity");
        }
    }

    pub fn remove(&self, user_id: &str) -> bool {
        self.entries.write().remove(user_id).is_some()
    }

    pub fn is_locked(&self, user_id: &str) -> bool {
        self.locks.lock().contains_key(user_id)
    }

    /// Runs `fut` while holding the user's lock. Waiters are served in
    /// submission order; one that waits longer than `timeout` gives up.
    pub async fn with_user_lock<F, T>(&self, user_id: &str, timeout: Duration, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let _guard = self.acquire(user_id, timeout).await?;
        fut.await
    }

    async fn acquire(&self, user_id: &str, timeout: Duration) -> Result<UserLockGuard<'_>> {
        let (slot, mutex) = {
            let mut locks = self.locks.lock();
            let slot = locks
                .entry(user_id.to_string())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(UserLock {
                        mutex: Arc::new(tokio::sync::Mutex::new(())),
                        pending: 0,
                    }))
                })
                .clone();
            let mutex = {
                let mut lock = slot.lock();
                lock.pending += 1;
                lock.mutex.clone()
            };
            (slot, mutex)
        };

        let ticket = QueueTicket {
            manager: self,
            user_id: user_id.to_string(),
            slot,
        };

        match tokio::time::timeout(timeout, mutex.lock_owned()).await {
            Ok(held) => Ok(UserLockGuard {
                _held: held,
                _ticket: ticket,
            }),
            Err(_) => {
                tracing::warn!(user_id, ?timeout, "user lock wait timed out");
                Err(AmasError::LockTimeout {
                    user_id: user_id.to_string(),
                    timeout,
                })
            }
        }
    }

    fn release(&self, user_id: &str, slot: &Arc<Mutex<UserLock>>) {
        let mut locks = self.locks.lock();
        let idle = {
            let mut lock = slot.lock();
            lock.pending = lock.pending.saturating_sub(1);
            lock.pending == 0
        };
        if idle {
            if let Some(current) = locks.get(user_id) {
                if Arc::ptr_eq(current, slot) {
                    locks.remove(user_id);
                }
            }
        }
    }

    /// Call with the entries write lock held, so no user can take its lock
    /// and read the cache between the snapshot and the eviction.
    fn locked_keys(&self) -> HashSet<String> {
        self.locks.lock().keys().cloned().collect()
    }

    /// TTL eviction, then LRU eviction. Entries whose lock is held or awaited survive.
    pub fn sweep(&self, now: i64) -> SweepReport {
        let expired = {
            let mut entries = self.entries.write();
            let locked = self.locked_keys();
            let before = entries.len();
            entries.retain(|key, entry| {
                locked.contains(key) || now.saturating_sub(entry.last_access) <= self.ttl_ms
            });
            before - entries.len()
        };

        let evicted = if self.entries.read().len() > self.capacity {
            self.evict_lru()
        } else {
            0
        };

        let report = SweepReport { expired, evicted };
        if report.total() > 0 {
            tracing::info!(expired, evicted, "model cache swept");
        }
        report
    }

    fn evict_lru(&self) -> usize {
        let target = ((self.capacity as f64) * LRU_TARGET_RATIO).floor() as usize;

        let mut entries = self.entries.write();
        if entries.len() <= target {
            return 0;
        }
        let locked = self.locked_keys();

        let mut candidates: Vec<(String, i64)> = entries
            .iter()
            .filter(|(key, _)| !locked.contains(*key))
            .map(|(key, entry)| (key.clone(), entry.last_access))
            .collect();
        candidates.sort_by_key(|(_, last_access)| *last_access);

        let excess = entries.len() - target;
        let mut evicted = 0;
        for (key, _) in candidates.into_iter().take(excess) {
            entries.remove(&key);
            evicted += 1;
        }
        evicted
    }

    /// Background sweeper. Stops once the manager is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let manager: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.sweep(now_ms());
            }
        })
    }

    pub fn memory_stats(&self) -> MemoryStats {
        let entries = self.entries.read().len();
        let lock_queues = self.locks.lock().len();
        MemoryStats {
            entries,
            lock_queues,
            capacity: self.capacity,
            utilization_percent: entries as f64 / self.capacity as f64 * 100.0,
        }
    }

    #[cfg(test)]
    fn set_last_access(&self, user_id: &str, ts: i64) {
        if let Some(entry) = self.entries.write().get_mut(user_id) {
            entry.last_access = ts;
        }
    }
}

/// A place in a user's lock queue. Dropping it is the only release path.
struct QueueTicket<'a> {
    manager: &'a IsolationManager,
    user_id: String,
    slot: Arc<Mutex<UserLock>>,
}

impl Drop for QueueTicket<'_> {
    fn drop(&mut self) {
        self.manager.release(&self.user_id, &self.slot);
    }
}

struct UserLockGuard<'a> {
    // Field order matters: the tokio guard is released before the ticket prunes the queue.
    _held: OwnedMutexGuard<()>,
    _ticket: QueueTicket<'a>,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
