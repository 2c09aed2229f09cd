use std::collections::VecDeque;

use chrono::{DateTime, Timelike, Utc};

use crate::amas::config::PerceptionConfig;
use crate::amas::types::{FeatureVector, RawEvent, UserState};

pub const CONTEXT_LABELS: [&str; 10] = [
    "rt_norm",
    "dwell_norm",
    "correct",
    "retry_norm",
    "attention",
    "fatigue",
    "motivation",
    "memory",
    "speed",
    "hour",
];

/// Per-event statistics consumed by the state sub-models.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSet {
    pub rt_norm: f64,
    pub rt_mean: f64,
    pub rt_cv: f64,
    pub pace_cv: f64,
    pub pause_norm: f64,
    pub retry_norm: f64,
    pub dwell_norm: f64,
    pub hint_used: bool,
    pub recent_accuracy: f64,
    pub avg_response_time: f64,
    pub error_rate_trend: f64,
    pub rt_increase_rate: f64,
    pub repeat_errors: i32,
    pub break_minutes: Option<f64>,
}

impl Default for FeatureSet {
    fn default() -> Self {
        Self {
            rt_norm: 0.1,
            rt_mean: 0.1,
            rt_cv: 0.0,
            pace_cv: 0.0,
            pause_norm: 0.0,
            retry_norm: 0.0,
            dwell_norm: 0.2,
            hint_used: false,
            recent_accuracy: 0.7,
            avg_response_time: 3000.0,
            error_rate_trend: 0.0,
            rt_increase_rate: 0.0,
            repeat_errors: 0,
            break_minutes: None,
        }
    }
}

/// Turns the recent event history plus the incoming event into features.
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, history: &EventWindow, event: &RawEvent) -> FeatureSet;
}

/// Bounded history of a user's most recent events, oldest first.
#[derive(Debug, Clone)]
pub struct EventWindow {
    events: VecDeque<RawEvent>,
    capacity: usize,
}

impl EventWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, event: RawEvent) {
        if self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn last(&self) -> Option<&RawEvent> {
        self.events.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RawEvent> + '_ {
        self.events.iter()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn error_rate(&self) -> f64 {
        if self.events.is_empty() {
            return 0.0;
        }
        let errors = self.events.iter().filter(|ev| !ev.is_correct).count();
        errors as f64 / self.events.len() as f64
    }

    /// Error rate over the window, counting `pending` as the newest event.
    pub fn error_rate_with(&self, pending: &RawEvent) -> f64 {
        let (errors, total) = self
            .iter()
            .skip(self.len().saturating_sub(self.capacity - 1))
            .chain(std::iter::once(pending))
            .fold((0usize, 0usize), |(e, t), ev| (e + !ev.is_correct as usize, t + 1));
        errors as f64 / total as f64
    }
}

/// Default extractor: simple statistics over the window plus the new event.
#[derive(Debug, Clone, Default)]
pub struct WindowFeatureExtractor {
    perception: PerceptionConfig,
}

impl WindowFeatureExtractor {
    pub fn new(perception: PerceptionConfig) -> Self {
        Self { perception }
    }
}

impl FeatureExtractor for WindowFeatureExtractor {
    fn extract(&self, history: &EventWindow, event: &RawEvent) -> FeatureSet {
        let p = &self.perception;
        let max_rt = p.max_response_time.max(1) as f64;
        let max_dwell = p.max_dwell_time.max(1) as f64;

        let events: Vec<&RawEvent> = history
            .iter()
            .skip(history.len().saturating_sub(history.capacity - 1))
            .chain(std::iter::once(event))
            .collect();
        let rts: Vec<f64> = events
            .iter()
            .map(|e| (e.response_time as f64).min(max_rt))
            .collect();
        let outcomes: Vec<f64> = events
            .iter()
            .map(|e| if e.is_correct { 1.0 } else { 0.0 })
            .collect();

        let avg_rt = mean(&rts);
        let gaps: Vec<f64> = events
            .windows(2)
            .map(|w| (w[1].timestamp - w[0].timestamp).max(0) as f64)
            .collect();

        let half = events.len() / 2;
        let (older_err, newer_err) = if half > 0 {
            (
                1.0 - mean(&outcomes[..half]),
                1.0 - mean(&outcomes[events.len() - half..]),
            )
        } else {
            (0.0, 0.0)
        };
        let rt_increase_rate = if half > 0 {
            let older = mean(&rts[..half]).max(1.0);
            ((mean(&rts[events.len() - half..]) - older) / older).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let repeat_errors = events.iter().rev().take_while(|e| !e.is_correct).count() as i32;
        let break_minutes = history
            .last()
            .map(|prev| (event.timestamp - prev.timestamp).max(0) as f64 / 60_000.0);

        let dwell = event
            .dwell_time
            .map(|d| d as f64)
            .unwrap_or(event.response_time as f64);

        FeatureSet {
            rt_norm: (event.response_time as f64 / max_rt).clamp(0.0, 1.0),
            rt_mean: (avg_rt / max_rt).clamp(0.0, 1.0),
            rt_cv: coefficient_of_variation(&rts).clamp(0.0, 1.0),
            pace_cv: coefficient_of_variation(&gaps).clamp(0.0, 1.0),
            pause_norm: (event.paused_time_ms.unwrap_or(0) as f64 / 60_000.0).clamp(0.0, 1.0),
            retry_norm: (event.retry_count as f64 / p.max_retry_count.max(1) as f64)
                .clamp(0.0, 1.0),
            dwell_norm: (dwell / max_dwell).clamp(0.0, 1.0),
            hint_used: event.hint_used,
            recent_accuracy: mean(&outcomes),
            avg_response_time: avg_rt,
            error_rate_trend: newer_err - older_err,
            rt_increase_rate,
            repeat_errors,
            break_minutes,
        }
    }
}

/// The 10-dimensional bandit context for one event.
pub fn context_vector(features: &FeatureSet, state: &UserState, event: &RawEvent) -> FeatureVector {
    let correct = if event.is_correct { 1.0 } else { 0.0 };
    let values = vec![
        features.rt_norm,
        features.dwell_norm,
        correct,
        features.retry_norm,
        state.attention,
        state.fatigue,
        ((state.motivation + 1.0) / 2.0).clamp(0.0, 1.0),
        state.cognitive.mem,
        state.cognitive.speed,
        hour_of_day(event.timestamp) as f64 / 23.0,
    ];
    FeatureVector::with_ts(
        values,
        CONTEXT_LABELS.iter().map(|s| s.to_string()).collect(),
        event.timestamp,
    )
}

pub fn hour_of_day(timestamp_ms: i64) -> u32 {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .map(|dt| dt.hour())
        .unwrap_or(12)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn coefficient_of_variation(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    if m.abs() < 1e-9 {
        return 0.0;
    }
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt() / m
}
