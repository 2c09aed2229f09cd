use std::collections::VecDeque;

use crate::amas::config::TrendParams;
use crate::amas::types::TrendState;

/// Least-squares slope and variance of the composite ability score over a short window.
#[derive(Debug, Clone)]
pub struct TrendAnalyzer {
    params: TrendParams,
    history: VecDeque<f64>,
    current_trend: TrendState,
}

impl TrendAnalyzer {
    pub fn new(params: TrendParams) -> Self {
        let capacity = params.window_size.max(2);
        Self {
            params,
            history: VecDeque::with_capacity(capacity),
            current_trend: TrendState::Flat,
        }
    }

    pub fn update(&mut self, ability: f64) -> TrendState {
        if !ability.is_finite() {
            return self.current_trend;
        }
        self.history.push_back(ability);
        while self.history.len() > self.params.window_size.max(2) {
            self.history.pop_front();
        }

        if self.history.len() < self.params.min_samples.max(2) {
            self.current_trend = TrendState::Flat;
            return self.current_trend;
        }

        let slope = self.slope();
        let variance = self.variance();

        self.current_trend = if slope > self.params.up_threshold {
            TrendState::Up
        } else if slope < self.params.down_threshold {
            TrendState::Down
        } else if variance < self.params.stuck_variance_threshold {
            TrendState::Stuck
        } else {
            TrendState::Flat
        };

        self.current_trend
    }

    pub fn current(&self) -> TrendState {
        self.current_trend
    }

    pub fn set_current(&mut self, trend: TrendState) {
        self.current_trend = trend;
    }

    fn slope(&self) -> f64 {
        let n = self.history.len() as f64;
        let sum_x: f64 = (0..self.history.len()).map(|i| i as f64).sum();
        let sum_y: f64 = self.history.iter().sum();
        let sum_xy: f64 = self
            .history
            .iter()
            .enumerate()
            .map(|(i, y)| i as f64 * y)
            .sum();
        let sum_xx: f64 = (0..self.history.len()).map(|i| (i as f64).powi(2)).sum();

        let denominator = n * sum_xx - sum_x.powi(2);
        if denominator.abs() < 1e-10 {
            return 0.0;
        }
        (n * sum_xy - sum_x * sum_y) / denominator
    }

    fn variance(&self) -> f64 {
        let n = self.history.len() as f64;
        let mean = self.history.iter().sum::<f64>() / n;
        self.history.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n
    }
}

impl Default for TrendAnalyzer {
    fn default() -> Self {
        Self::new(TrendParams::default())
    }
}
