use crate::amas::types::{DifficultyLevel, StrategyParams};

pub const BATCH_SIZES: [i32; 4] = [5, 8, 12, 16];
pub const NEW_RATIOS: [f64; 4] = [0.1, 0.2, 0.3, 0.4];
pub const INTERVAL_SCALES: [f64; 5] = [0.5, 0.8, 1.0, 1.2, 1.5];

/// The fixed, ordered set of arms every decision model chooses from.
///
/// Order matters: it is the final tie-break for equal scores.
#[derive(Debug, Clone)]
pub struct ActionSpace {
    actions: Vec<StrategyParams>,
}

impl ActionSpace {
    pub fn standard() -> Self {
        let mut actions = Vec::with_capacity(48);
        for difficulty in DifficultyLevel::ALL {
            let (interval_scale, hint_level) = difficulty_defaults(difficulty);
            for batch_size in BATCH_SIZES {
                for new_ratio in NEW_RATIOS {
                    actions.push(StrategyParams {
                        interval_scale,
                        new_ratio,
                        difficulty,
                        batch_size,
                        hint_level,
                    });
                }
            }
        }
        Self { actions }
    }

    pub fn from_actions(actions: Vec<StrategyParams>) -> Self {
        Self { actions }
    }

    pub fn actions(&self) -> &[StrategyParams] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Closest arm to an arbitrary strategy, used to snap blended votes.
    pub fn nearest(&self, target: &StrategyParams) -> Option<&StrategyParams> {
        self.actions.iter().min_by(|a, b| {
            distance(a, target)
                .partial_cmp(&distance(b, target))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    }
}

impl Default for ActionSpace {
    fn default() -> Self {
        Self::standard()
    }
}

fn difficulty_defaults(difficulty: DifficultyLevel) -> (f64, i32) {
    match difficulty {
        DifficultyLevel::Easy => (1.2, 2),
        DifficultyLevel::Mid => (1.0, 1),
        DifficultyLevel::Hard => (0.8, 0),
    }
}

fn distance(a: &StrategyParams, b: &StrategyParams) -> f64 {
    let diff = if a.difficulty == b.difficulty { 0.0 } else { 1.0 };
    let batch = (a.batch_size - b.batch_size).abs() as f64 / 11.0;
    let ratio = (a.new_ratio - b.new_ratio).abs() / 0.3;
    diff * 2.0 + batch + ratio
}

pub fn snap_interval_scale(value: f64) -> f64 {
    snap_f64(value, &INTERVAL_SCALES, 1.0)
}

pub fn snap_new_ratio(value: f64) -> f64 {
    snap_f64(value, &NEW_RATIOS, 0.2)
}

pub fn snap_batch_size(value: f64) -> i32 {
    BATCH_SIZES
        .iter()
        .copied()
        .min_by(|a, b| {
            (*a as f64 - value)
                .abs()
                .partial_cmp(&(*b as f64 - value).abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .unwrap_or(8)
}

fn snap_f64(value: f64, options: &[f64], fallback: f64) -> f64 {
    options
        .iter()
        .copied()
        .min_by(|a, b| {
            (a - value)
                .abs()
                .partial_cmp(&(b - value).abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_space_has_48_unique_arms() {
        let space = ActionSpace::standard();
        assert_eq!(space.len(), 48);
        let mut keys: Vec<String> = space.actions().iter().map(|a| a.key()).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), 48);
    }

    #[test]
    fn nearest_returns_exact_member() {
        let space = ActionSpace::standard();
        let target = space.actions()[17].clone();
        assert_eq!(space.nearest(&target), Some(&target));
    }

    #[test]
    fn snapping_picks_closest_grid_point() {
        assert_eq!(snap_batch_size(10.4), 12);
        assert_eq!(snap_batch_size(6.0), 5);
        assert!((snap_new_ratio(0.26) - 0.3).abs() < 1e-9);
        assert!((snap_interval_scale(1.34) - 1.2).abs() < 1e-9);
    }
}
