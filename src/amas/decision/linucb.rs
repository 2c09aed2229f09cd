use serde::{Deserialize, Serialize};

use crate::amas::decision::matrix::{self, Diagnostic, MIN_LAMBDA};
use crate::amas::error::{AmasError, Result};
use crate::amas::types::{FeatureVector, StrategyParams};

pub const ACTION_FEATURE_DIM: usize = 5;
const TIE_EPSILON: f64 = 1e-12;

pub const ACTION_FEATURE_LABELS: [&str; ACTION_FEATURE_DIM] = [
    "action_difficulty",
    "action_new_ratio",
    "action_batch",
    "action_interval",
    "action_hint",
];

/// Persisted form of the ridge bandit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BanditModel {
    pub d: usize,
    pub context_dim: usize,
    pub lambda: f64,
    pub alpha: f64,
    pub a_matrix: Vec<f64>,
    pub b: Vec<f64>,
    pub l_matrix: Vec<f64>,
    pub update_count: u64,
}

impl BanditModel {
    pub fn is_finite(&self) -> bool {
        matrix::all_finite(&self.a_matrix)
            && matrix::all_finite(&self.b)
            && matrix::all_finite(&self.l_matrix)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UcbScore {
    pub exploitation: f64,
    pub confidence: f64,
    pub score: f64,
}

/// Ridge-regression UCB over `[context | action]` inputs with an
/// incrementally maintained Cholesky factor.
#[derive(Debug, Clone)]
pub struct LinUCBModel {
    d: usize,
    context_dim: usize,
    lambda: f64,
    alpha: f64,
    a: Vec<f64>,
    b: Vec<f64>,
    l: Vec<f64>,
    theta: Option<Vec<f64>>,
    update_count: u64,
}

impl LinUCBModel {
    pub fn new(context_dim: usize, alpha: f64, lambda: f64) -> Self {
        let lambda = lambda.max(MIN_LAMBDA);
        let d = context_dim + ACTION_FEATURE_DIM;
        Self {
            d,
            context_dim,
            lambda,
            alpha: alpha.max(0.0),
            a: matrix::identity_scaled(d, lambda),
            b: vec![0.0; d],
            l: matrix::identity_scaled(d, lambda.sqrt()),
            theta: None,
            update_count: 0,
        }
    }

    pub fn from_snapshot(model: BanditModel) -> Result<Self> {
        let d = model.d;
        if d != model.context_dim + ACTION_FEATURE_DIM
            || model.a_matrix.len() != d * d
            || model.l_matrix.len() != d * d
            || model.b.len() != d
        {
            return Err(AmasError::Storage(format!(
                "bandit snapshot has inconsistent dimensions (d = {d})"
            )));
        }

        let lambda = model.lambda.max(MIN_LAMBDA);
        let mut restored = Self {
            d,
            context_dim: model.context_dim,
            lambda,
            alpha: model.alpha.max(0.0),
            a: model.a_matrix,
            b: model.b,
            l: model.l_matrix,
            theta: None,
            update_count: model.update_count,
        };

        if !restored.is_finite() {
            tracing::warn!(d, "bandit snapshot contained non-finite values, repairing");
            restored.repair();
        }
        Ok(restored)
    }

    pub fn to_snapshot(&self) -> BanditModel {
        BanditModel {
            d: self.d,
            context_dim: self.context_dim,
            lambda: self.lambda,
            alpha: self.alpha,
            a_matrix: self.a.clone(),
            b: self.b.clone(),
            l_matrix: self.l.clone(),
            update_count: self.update_count,
        }
    }

    pub fn dimension(&self) -> usize {
        self.d
    }

    pub fn context_dim(&self) -> usize {
        self.context_dim
    }

    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn set_alpha(&mut self, alpha: f64) {
        self.alpha = alpha.max(0.0);
    }

    pub fn action_features(strategy: &StrategyParams) -> [f64; ACTION_FEATURE_DIM] {
        [
            strategy.difficulty.feature_value(),
            strategy.new_ratio,
            strategy.batch_size as f64 / 20.0,
            strategy.interval_scale,
            strategy.hint_level as f64 / 2.0,
        ]
    }

    /// Concatenates the context (padded or cut to `context_dim`) with the action encoding.
    pub fn build_input(&self, context: &FeatureVector, strategy: &StrategyParams) -> Vec<f64> {
        let mut x = pad_or_truncate(&context.values, self.context_dim);
        x.extend_from_slice(&Self::action_features(strategy));
        matrix::sanitize_features(&mut x);
        x
    }

    pub fn input_labels(context: &FeatureVector, context_dim: usize) -> Vec<String> {
        let mut labels: Vec<String> = (0..context_dim)
            .map(|i| {
                context
                    .labels
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("ctx_{i}"))
            })
            .collect();
        labels.extend(ACTION_FEATURE_LABELS.iter().map(|s| s.to_string()));
        labels
    }

    /// θ = A⁻¹b, computed on first read after an update.
    pub fn theta(&mut self) -> &[f64] {
        if self.theta.is_none() {
            let mut theta = matrix::solve_cholesky(&self.l, &self.b, self.d);
            if !matrix::all_finite(&theta) {
                tracing::warn!("non-finite theta, rebuilding factor");
                self.repair();
                theta = matrix::solve_cholesky(&self.l, &self.b, self.d);
            }
            self.theta = Some(theta);
        }
        self.theta.as_deref().unwrap_or(&[])
    }

    pub fn score(&mut self, x: &[f64]) -> UcbScore {
        let d = self.d;
        let exploitation = matrix::dot(self.theta(), x);
        let confidence = matrix::quadratic_form(&self.l, x, d).max(0.0).sqrt();
        UcbScore {
            exploitation,
            confidence,
            score: exploitation + self.alpha * confidence,
        }
    }

    /// Highest UCB wins; ties go to the larger batch, then to the earlier candidate.
    pub fn select_action(
        &mut self,
        context: &FeatureVector,
        candidates: &[StrategyParams],
    ) -> Option<(StrategyParams, UcbScore)> {
        let mut best: Option<(usize, UcbScore)> = None;

        for (idx, candidate) in candidates.iter().enumerate() {
            let x = self.build_input(context, candidate);
            let score = self.score(&x);
            let better = match best {
                None => true,
                Some((best_idx, best_score)) => {
                    let delta = score.score - best_score.score;
                    if delta > TIE_EPSILON {
                        true
                    } else if delta.abs() <= TIE_EPSILON {
                        candidate.batch_size > candidates[best_idx].batch_size
                    } else {
                        false
                    }
                }
            };
            if better {
                best = Some((idx, score));
            }
        }

        best.map(|(idx, score)| (candidates[idx].clone(), score))
    }

    /// Maps the exploration width to a `[min_conf, max_conf]` confidence.
    pub fn confidence_for(&mut self, x: &[f64], min_conf: f64, max_conf: f64) -> f64 {
        let width = self.score(x).confidence;
        (max_conf - 0.3 * width).clamp(min_conf, max_conf)
    }

    /// Rank-1 update `A += xxᵗ`, `b += r·x`. Inputs of the wrong length are adapted.
    pub fn update(&mut self, x: &[f64], reward: f64) {
        let mut x = pad_or_truncate(x, self.d);
        matrix::sanitize_features(&mut x);
        let reward = if reward.is_finite() {
            reward.clamp(-1.0, 1.0)
        } else {
            0.0
        };

        let recompute = matrix::needs_full_recompute(self.update_count, &self.l, self.d);

        matrix::rank1_add(&mut self.a, &x, self.d);
        matrix::add_scaled(&mut self.b, &x, reward);

        if recompute || !matrix::cholesky_rank1_update(&mut self.l, &x, self.d) {
            self.rebuild_factor();
        }

        self.update_count += 1;
        self.theta = None;
    }

    pub fn is_finite(&self) -> bool {
        matrix::all_finite(&self.a)
            && matrix::all_finite(&self.b)
            && matrix::all_finite(&self.l)
            && self
                .theta
                .as_deref()
                .map(matrix::all_finite)
                .unwrap_or(true)
    }

    pub fn diagnose(&self) -> Diagnostic {
        matrix::diagnose(&self.a, &self.l, self.d)
    }

    fn rebuild_factor(&mut self) {
        matrix::sanitize_covariance(&mut self.a, self.d, self.lambda);
        self.l = matrix::cholesky_decompose(&self.a, self.d, self.lambda);
    }

    fn repair(&mut self) {
        for v in self.b.iter_mut() {
            if !v.is_finite() {
                *v = 0.0;
            }
        }
        self.rebuild_factor();
        self.theta = None;
    }
}

/// Zero-pads short vectors and truncates long ones.
pub fn pad_or_truncate(values: &[f64], dim: usize) -> Vec<f64> {
    let mut out = values.iter().copied().take(dim).collect::<Vec<_>>();
    out.resize(dim, 0.0);
    out
}
