use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::amas::config::ThompsonContextConfig;
use crate::amas::types::{StrategyParams, UserState};

const MAX_PARAMS_CACHE_SIZE: usize = 1000;
const MAX_GAMMA_ITERATIONS: usize = 10000;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BetaParams {
    alpha: f64,
    beta: f64,
    last_used: u64,
}

impl BetaParams {
    fn new(prior_alpha: f64, prior_beta: f64, last_used: u64) -> Self {
        Self {
            alpha: prior_alpha,
            beta: prior_beta,
            last_used,
        }
    }

    fn observe(&mut self, success: bool, counter: u64) {
        if success {
            self.alpha += 1.0;
        } else {
            self.beta += 1.0;
        }
        self.last_used = counter;
    }

    fn std_dev(&self) -> f64 {
        let total = self.alpha + self.beta;
        (self.alpha * self.beta / (total * total * (total + 1.0))).sqrt()
    }
}

/// Beta-Bernoulli sampler with a global posterior per arm and a second one per
/// coarse state bucket. A positive reward counts as a success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThompsonSamplingModel {
    prior_alpha: f64,
    prior_beta: f64,
    #[serde(default)]
    global_params: HashMap<String, BetaParams>,
    #[serde(default)]
    context_params: HashMap<String, BetaParams>,
    context_bins: usize,
    context_weight: f64,
    access_counter: u64,
}

impl ThompsonSamplingModel {
    pub fn new(prior_alpha: f64, prior_beta: f64) -> Self {
        let defaults = ThompsonContextConfig::default();
        Self {
            prior_alpha: prior_alpha.max(1e-3),
            prior_beta: prior_beta.max(1e-3),
            global_params: HashMap::new(),
            context_params: HashMap::new(),
            context_bins: defaults.bins,
            context_weight: defaults.weight,
            access_counter: 0,
        }
    }

    pub fn with_context(config: &ThompsonContextConfig) -> Self {
        let mut model = Self::default();
        model.set_context_config(config.bins, config.weight);
        model
    }

    pub fn set_context_config(&mut self, bins: usize, weight: f64) {
        self.context_bins = bins.max(2);
        self.context_weight = weight.clamp(0.0, 1.0);
    }

    pub fn select_action(
        &mut self,
        state: &UserState,
        candidates: &[StrategyParams],
    ) -> Option<(StrategyParams, f64)> {
        let mut rng = rand::rng();
        self.select_action_with_rng(&mut rng, state, candidates)
    }

    /// Returns the arm with the highest blended sample and its posterior confidence.
    pub fn select_action_with_rng<R: Rng>(
        &mut self,
        rng: &mut R,
        state: &UserState,
        candidates: &[StrategyParams],
    ) -> Option<(StrategyParams, f64)> {
        let context_key = self.context_signature(state);
        let mut best: Option<(usize, f64)> = None;

        for (idx, candidate) in candidates.iter().enumerate() {
            let action_key = candidate.key();
            let global = self.touch_global(&action_key);
            let local = self.touch_context(&context_key, &action_key);
            let sample = (1.0 - self.context_weight) * sample_beta(rng, global.alpha, global.beta)
                + self.context_weight * sample_beta(rng, local.alpha, local.beta);

            if best.map(|(_, score)| sample > score).unwrap_or(true) {
                best = Some((idx, sample));
            }
        }

        best.map(|(idx, _)| {
            let chosen = candidates[idx].clone();
            let confidence = self.confidence(state, &chosen);
            (chosen, confidence)
        })
    }

    /// Narrow posteriors give high confidence; an untouched arm sits near 0.4.
    pub fn confidence(&self, state: &UserState, strategy: &StrategyParams) -> f64 {
        let action_key = strategy.key();
        let full_key = format!("{}|{}", self.context_signature(state), action_key);
        let prior = BetaParams::new(self.prior_alpha, self.prior_beta, 0);
        let global = self.global_params.get(&action_key).unwrap_or(&prior);
        let local = self.context_params.get(&full_key).unwrap_or(&prior);
        let spread =
            (1.0 - self.context_weight) * global.std_dev() + self.context_weight * local.std_dev();
        (1.0 - 2.0 * spread).clamp(0.2, 0.95)
    }

    pub fn update(&mut self, state: &UserState, strategy: &StrategyParams, reward: f64) {
        let success = reward.is_finite() && reward > 0.0;
        let action_key = strategy.key();
        let context_key = self.context_signature(state);

        self.touch_global(&action_key);
        self.touch_context(&context_key, &action_key);
        let counter = self.access_counter;

        if let Some(params) = self.global_params.get_mut(&action_key) {
            params.observe(success, counter);
        }
        let full_key = format!("{context_key}|{action_key}");
        if let Some(params) = self.context_params.get_mut(&full_key) {
            params.observe(success, counter);
        }
    }

    /// Total observations recorded for an arm across all contexts.
    pub fn observations(&self, strategy: &StrategyParams) -> f64 {
        self.global_params
            .get(&strategy.key())
            .map(|p| p.alpha + p.beta - self.prior_alpha - self.prior_beta)
            .unwrap_or(0.0)
    }

    fn touch_global(&mut self, action_key: &str) -> BetaParams {
        self.access_counter += 1;
        let counter = self.access_counter;
        evict_if_needed(&mut self.global_params);
        touch_in(
            &mut self.global_params,
            action_key,
            self.prior_alpha,
            self.prior_beta,
            counter,
        )
    }

    fn touch_context(&mut self, context_key: &str, action_key: &str) -> BetaParams {
        let full_key = format!("{context_key}|{action_key}");
        self.access_counter += 1;
        let counter = self.access_counter;
        evict_if_needed(&mut self.context_params);
        touch_in(
            &mut self.context_params,
            &full_key,
            self.prior_alpha,
            self.prior_beta,
            counter,
        )
    }

    fn context_signature(&self, state: &UserState) -> String {
        let bins = self.context_bins.max(2);
        let max_idx = (bins - 1) as i32;
        let bin = |value: f64| -> i32 {
            let idx = (value.clamp(0.0, 1.0) * bins as f64).floor() as i32;
            idx.clamp(0, max_idx)
        };
        let motivation = (state.motivation + 1.0) / 2.0;

        format!(
            "a{}_f{}_m{}",
            bin(state.attention),
            bin(state.fatigue),
            bin(motivation)
        )
    }
}

impl Default for ThompsonSamplingModel {
    fn default() -> Self {
        Self::new(1.0, 1.0)
    }
}

fn touch_in(
    map: &mut HashMap<String, BetaParams>,
    key: &str,
    prior_alpha: f64,
    prior_beta: f64,
    counter: u64,
) -> BetaParams {
    map.entry(key.to_string())
        .and_modify(|p| p.last_used = counter)
        .or_insert_with(|| BetaParams::new(prior_alpha, prior_beta, counter))
        .clone()
}

fn evict_if_needed(map: &mut HashMap<String, BetaParams>) {
    if map.len() <= MAX_PARAMS_CACHE_SIZE {
        return;
    }

    let mut entries: Vec<_> = map
        .iter()
        .map(|(k, v)| (k.clone(), v.last_used))
        .collect();
    entries.sort_by_key(|(_, lu)| *lu);

    let to_remove = map.len() - MAX_PARAMS_CACHE_SIZE / 2;
    for (key, _) in entries.into_iter().take(to_remove) {
        map.remove(&key);
    }
}

fn sample_beta<R: Rng>(rng: &mut R, alpha: f64, beta: f64) -> f64 {
    if alpha <= 0.0 || beta <= 0.0 {
        return 0.5;
    }

    let gamma1 = sample_gamma(rng, alpha);
    let gamma2 = sample_gamma(rng, beta);

    if gamma1 + gamma2 == 0.0 {
        return 0.5;
    }

    gamma1 / (gamma1 + gamma2)
}

// Marsaglia-Tsang.
fn sample_gamma<R: Rng>(rng: &mut R, shape: f64) -> f64 {
    if shape < 1.0 {
        let u: f64 = rng.random();
        return sample_gamma(rng, shape + 1.0) * u.powf(1.0 / shape);
    }

    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();

    for _ in 0..MAX_GAMMA_ITERATIONS {
        let z = random_normal(rng);
        let v = (1.0 + c * z).powi(3);

        if v <= 0.0 {
            continue;
        }

        let u: f64 = rng.random();
        let z_sq = z * z;

        if u < 1.0 - 0.0331 * z_sq * z_sq {
            return d * v;
        }

        if u.ln() < 0.5 * z_sq + d * (1.0 - v + v.ln()) {
            return d * v;
        }
    }

    d
}

fn random_normal<R: Rng>(rng: &mut R) -> f64 {
    let u1: f64 = rng.random::<f64>().max(1e-10);
    let u2: f64 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}
