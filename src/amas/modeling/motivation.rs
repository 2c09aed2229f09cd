use crate::amas::config::MotivationParams;
use crate::amas::types::NEUTRAL_MOTIVATION;

#[derive(Debug, Clone, Copy)]
pub struct MotivationEvent {
    pub is_correct: bool,
    pub is_quit: bool,
}

/// Motivation in `[-1, 1]`: rewarded by correct streaks, punished by errors and quits.
#[derive(Debug, Clone)]
pub struct MotivationTracker {
    params: MotivationParams,
    current_value: f64,
    streak: i32,
}

impl MotivationTracker {
    pub fn new(params: MotivationParams) -> Self {
        Self {
            params,
            current_value: NEUTRAL_MOTIVATION,
            streak: 0,
        }
    }

    pub fn update(&mut self, event: MotivationEvent) -> f64 {
        let p = &self.params;
        if event.is_quit {
            self.current_value = p.rho * self.current_value - p.mu;
            self.streak = 0;
        } else if event.is_correct {
            self.streak += 1;
            let streak_bonus = (self.streak as f64 / 10.0).min(0.5) * p.kappa;
            self.current_value = p.rho * self.current_value + p.kappa + streak_bonus;
        } else {
            self.streak = 0;
            self.current_value = p.rho * self.current_value - p.lambda;
        }

        self.current_value = self.current_value.clamp(-1.0, 1.0);
        self.current_value
    }

    pub fn current(&self) -> f64 {
        self.current_value
    }

    pub fn streak(&self) -> i32 {
        self.streak
    }

    pub fn set_value(&mut self, value: f64) {
        if value.is_finite() {
            self.current_value = value.clamp(-1.0, 1.0);
        }
    }
}

impl Default for MotivationTracker {
    fn default() -> Self {
        Self::new(MotivationParams::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_can_drive_motivation_negative() {
        let mut tracker = MotivationTracker::default();
        for _ in 0..20 {
            tracker.update(MotivationEvent {
                is_correct: false,
                is_quit: false,
            });
        }
        assert!(tracker.current() < 0.0);
        assert!(tracker.current() >= -1.0);
    }

    #[test]
    fn streak_resets_on_quit() {
        let mut tracker = MotivationTracker::default();
        for _ in 0..3 {
            tracker.update(MotivationEvent {
                is_correct: true,
                is_quit: false,
            });
        }
        assert_eq!(tracker.streak(), 3);
        tracker.update(MotivationEvent {
            is_correct: true,
            is_quit: true,
        });
        assert_eq!(tracker.streak(), 0);
    }

    #[test]
    fn correct_streak_stays_bounded() {
        let mut tracker = MotivationTracker::default();
        for _ in 0..200 {
            tracker.update(MotivationEvent {
                is_correct: true,
                is_quit: false,
            });
        }
        assert!(tracker.current() <= 1.0);
        assert!(tracker.current() > 0.9);
    }
}
