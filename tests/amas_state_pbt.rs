//! Property-based tests for the AMAS invariants:
//! - user state stays within bounds after any event sequence
//! - offline decay never leaves bounds
//! - guardrails always produce a strategy inside the hard limits
//! - cold start issues exactly five probes, one per update
//! - the ridge bandit stays finite under arbitrary inputs

use proptest::prelude::*;

use danci_amas::amas::config::{AMASConfig, ColdStartPolicy, DecayConfig, GuardrailPolicy};
use danci_amas::amas::decision::{apply_guardrails, ColdStartManager, LinUCBModel};
use danci_amas::amas::modeling::{
    apply_decay, EventWindow, FeatureExtractor, StateEstimator, SubModels, WindowFeatureExtractor,
};
use danci_amas::amas::types::{
    CognitiveProfile, ColdStartPhase, DifficultyLevel, RawEvent, StrategyParams, UserState,
};

const FIXED_TIMESTAMP: i64 = 1700000000000;

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_f64_0_1() -> impl Strategy<Value = f64> {
    (0u64..=1000u64).prop_map(|v| v as f64 / 1000.0)
}

fn arb_user_state() -> impl Strategy<Value = UserState> {
    (
        arb_f64_0_1(),
        arb_f64_0_1(),
        (arb_f64_0_1(), arb_f64_0_1(), arb_f64_0_1()),
        (-1.0f64..=1.0f64),
        arb_f64_0_1(),
    )
        .prop_map(|(attention, fatigue, (mem, speed, stability), motivation, conf)| {
            let mut state = UserState::new_at(FIXED_TIMESTAMP);
            state.attention = attention;
            state.fatigue = fatigue;
            state.cognitive = CognitiveProfile {
                mem,
                speed,
                stability,
            };
            state.motivation = motivation;
            state.conf = conf;
            state
        })
}

fn arb_event() -> impl Strategy<Value = (bool, i64, Option<i64>, i32, Option<i64>, bool, bool, i64)>
{
    (
        any::<bool>(),
        0i64..120_000,
        proptest::option::of(0i64..60_000),
        0i32..10,
        proptest::option::of(0i64..7_200_000),
        any::<bool>(),
        any::<bool>(),
        0i64..3_600_000,
    )
}

fn arb_difficulty() -> impl Strategy<Value = DifficultyLevel> {
    prop_oneof![
        Just(DifficultyLevel::Easy),
        Just(DifficultyLevel::Mid),
        Just(DifficultyLevel::Hard),
    ]
}

fn arb_any_strategy() -> impl Strategy<Value = StrategyParams> {
    (
        prop_oneof![Just(f64::NAN), -5.0f64..10.0],
        prop_oneof![Just(f64::INFINITY), -1.0f64..3.0],
        arb_difficulty(),
        -10i32..60,
        -3i32..8,
    )
        .prop_map(
            |(interval_scale, new_ratio, difficulty, batch_size, hint_level)| StrategyParams {
                interval_scale,
                new_ratio,
                difficulty,
                batch_size,
                hint_level,
            },
        )
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn state_stays_bounded_after_any_sequence(
        start in arb_user_state(),
        events in proptest::collection::vec(arb_event(), 1..40),
    ) {
        let config = AMASConfig::default();
        let estimator = StateEstimator::new(&config);
        let extractor = WindowFeatureExtractor::new(config.perception.clone());
        let mut subs = SubModels::new(&config);
        let mut window = EventWindow::new(config.feature_window);
        let mut state = start;
        let mut ts = FIXED_TIMESTAMP;

        for (is_correct, rt, dwell, retries, paused, hint_used, is_quit, gap) in events {
            ts += gap + 1;
            let event = RawEvent {
                word_id: None,
                is_correct,
                response_time: rt,
                dwell_time: dwell,
                retry_count: retries,
                paused_time_ms: paused,
                hint_used,
                is_quit,
                timestamp: ts,
            };
            let prev = apply_decay(&state, ts, &config.decay);
            let features = extractor.extract(&window, &event);
            let error_rate = window.error_rate_with(&event);
            let (next, next_subs) = estimator.estimate(&prev, &features, &event, error_rate, &subs);

            prop_assert!(next.is_within_bounds(), "out of bounds: {:?}", next);
            prop_assert!(next.conf >= prev.conf);
            state = next;
            subs = next_subs;
            window.push(event);
        }
    }

    #[test]
    fn decay_keeps_bounds(state in arb_user_state(), offline_ms in 0i64..(400 * 86_400_000)) {
        let decayed = apply_decay(&state, state.ts + offline_ms, &DecayConfig::default());
        prop_assert!(decayed.is_within_bounds());
        prop_assert!(decayed.conf <= state.conf.max(DecayConfig::default().min_confidence));
    }

    #[test]
    fn guardrails_hold_hard_limits(
        proposed in arb_any_strategy(),
        previous in proptest::option::of(arb_any_strategy()),
        state in arb_user_state(),
    ) {
        let policy = GuardrailPolicy::default();
        let out = apply_guardrails(&policy, &proposed, previous.as_ref(), &state);
        let s = &out.strategy;

        prop_assert!((5..=20).contains(&s.batch_size));
        prop_assert!(s.new_ratio.is_finite() && (0.0..=1.0).contains(&s.new_ratio));
        prop_assert!(s.interval_scale.is_finite() && (0.5..=2.0).contains(&s.interval_scale));
        prop_assert!((0..=2).contains(&s.hint_level));
        if state.fatigue > policy.force_break_fatigue {
            prop_assert!(out.should_break);
            prop_assert_eq!(s.difficulty, DifficultyLevel::Easy);
        }
    }

    #[test]
    fn cold_start_issues_five_ordered_probes(
        outcomes in proptest::collection::vec((any::<bool>(), 300i64..10_000), 5..30),
    ) {
        let policy = ColdStartPolicy::default();
        let mut manager = ColdStartManager::new(policy.clone());

        for (i, (correct, rt)) in outcomes.iter().enumerate() {
            let before = manager.state().probe_index;
            let was_classifying = manager.phase() == ColdStartPhase::Classify;
            if was_classifying {
                prop_assert_eq!(manager.current_action(), Some(policy.probe_actions[i].clone()));
            }

            manager.update(*correct, *rt, 0.0);

            if was_classifying {
                prop_assert_eq!(manager.state().probe_index, before + 1);
            }
            prop_assert!(manager.state().probe_index <= 5);
            prop_assert!(manager.state().results.len() <= 20);
        }
        prop_assert_ne!(manager.phase(), ColdStartPhase::Classify);
        prop_assert!(manager.user_type().is_some());
    }

    #[test]
    fn bandit_stays_finite(
        updates in proptest::collection::vec(
            (
                proptest::collection::vec(
                    prop_oneof![Just(f64::NAN), Just(f64::INFINITY), -1e6f64..1e6],
                    0..25,
                ),
                prop_oneof![Just(f64::NAN), -10.0f64..10.0],
            ),
            1..60,
        ),
    ) {
        let mut model = LinUCBModel::new(10, 0.3, 1.0);
        for (x, reward) in &updates {
            model.update(x, *reward);
        }
        prop_assert!(model.is_finite());
        prop_assert_eq!(model.update_count(), updates.len() as u64);
        prop_assert!(model.to_snapshot().is_finite());
    }
}
