//! End-to-end tests for AMASEngine: cold start, persistence, delayed rewards,
//! concurrency and per-user isolation.

use std::sync::Arc;
use std::time::Duration;

use danci_amas::amas::config::AMASConfig;
use danci_amas::amas::engine::AMASEngine;
use danci_amas::amas::persistence::{
    InMemoryModelRepository, InMemoryStateRepository, MemoryDecisionTracer,
};
use danci_amas::amas::types::{
    ColdStartPhase, FallbackReason, FeatureVector, ProcessOptions, RawEvent, UserType,
};

const FIXED_TIMESTAMP: i64 = 1700000000000;

fn event_at(offset: i64, is_correct: bool, response_time: i64) -> RawEvent {
    RawEvent {
        word_id: Some(format!("w{offset}")),
        is_correct,
        response_time,
        dwell_time: Some(2000),
        timestamp: FIXED_TIMESTAMP + offset * 10_000,
        ..Default::default()
    }
}

struct Harness {
    engine: Arc<AMASEngine>,
    states: Arc<InMemoryStateRepository>,
    models: Arc<InMemoryModelRepository>,
}

fn harness() -> Harness {
    let states = Arc::new(InMemoryStateRepository::new());
    let models = Arc::new(InMemoryModelRepository::new());
    let engine = AMASEngine::new(AMASConfig::default())
        .with_repositories(states.clone(), models.clone());
    Harness {
        engine: Arc::new(engine),
        states,
        models,
    }
}

#[tokio::test]
async fn five_fast_correct_probes_classify_as_fast() {
    let h = harness();
    let probes = h.engine.config().policy.cold_start.probe_actions.clone();

    let mut last = None;
    for i in 0..5 {
        let result = h
            .engine
            .process_event("fast", event_at(i, true, 1200), ProcessOptions::default())
            .await;
        assert!(result.fallback_reason.is_none(), "event {i} fell back");

        let cs = result.state.cold_start.clone().unwrap();
        assert_eq!(cs.probe_index, (i + 1) as u32);
        if i < 4 {
            assert_eq!(result.cold_start_phase, ColdStartPhase::Classify);
            let probe = &probes[(i + 1) as usize];
            assert_eq!(result.strategy.difficulty, probe.difficulty);
            assert_eq!(result.strategy.batch_size, probe.batch_size);
        }
        last = Some(result);
    }

    let last = last.unwrap();
    assert_eq!(last.cold_start_phase, ColdStartPhase::Explore);
    assert_eq!(
        last.state.cold_start.as_ref().and_then(|cs| cs.user_type),
        Some(UserType::Fast)
    );
    assert_eq!(
        h.engine.get_cold_start_phase("fast").await,
        ColdStartPhase::Explore
    );
}

#[tokio::test]
async fn cold_start_eventually_hands_off_to_learned_models() {
    let h = harness();
    let mut phase = ColdStartPhase::Classify;
    for i in 0..25 {
        let result = h
            .engine
            .process_event("u", event_at(i, true, 2500), ProcessOptions::default())
            .await;
        assert!(result.fallback_reason.is_none());
        phase = result.cold_start_phase;
        assert!((5..=20).contains(&result.strategy.batch_size));
    }
    assert_eq!(phase, ColdStartPhase::Normal);
}

#[tokio::test]
async fn forced_open_circuit_does_no_work() {
    let h = harness();
    h.engine.force_circuit_open(true);

    let result = h
        .engine
        .process_event("u", event_at(0, true, 1500), ProcessOptions::default())
        .await;

    assert_eq!(result.fallback_reason, Some(FallbackReason::CircuitOpen));
    assert_eq!(result.reward.value, 0.0);
    assert!(!result.should_break);
    assert_eq!(h.states.save_count(), 0);
    assert_eq!(h.models.save_count(), 0);
    assert_eq!(h.engine.memory_stats().entries, 0);

    h.engine.force_circuit_open(false);
    let result = h
        .engine
        .process_event("u", event_at(1, true, 1500), ProcessOptions::default())
        .await;
    assert!(result.fallback_reason.is_none());
    assert_eq!(h.states.save_count(), 1);
}

#[tokio::test]
async fn short_delayed_reward_vector_is_padded() {
    let h = harness();
    let result = h
        .engine
        .process_event("u", event_at(0, true, 1500), ProcessOptions::default())
        .await;
    let fv = result.feature_vector.unwrap();
    let dim = fv.dim();

    let short = FeatureVector::with_ts(fv.values[..dim - 3].to_vec(), vec![], fv.ts);
    let outcome = h.engine.apply_delayed_reward_update("u", &short, 0.8).await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(h.models.get("u").unwrap().update_count, 2);
}

#[tokio::test]
async fn long_delayed_reward_vector_is_truncated() {
    let h = harness();
    h.engine
        .process_event("u", event_at(0, true, 1500), ProcessOptions::default())
        .await;
    let long = FeatureVector::with_ts(vec![0.3; 40], vec![], FIXED_TIMESTAMP);
    let outcome = h.engine.apply_delayed_reward_update("u", &long, -0.5).await;
    assert!(outcome.success);
    assert!(h.models.get("u").unwrap().is_finite());
}

#[tokio::test]
async fn delayed_reward_for_unknown_user_fails_cleanly() {
    let h = harness();
    let fv = FeatureVector::with_ts(vec![0.5; 15], vec![], FIXED_TIMESTAMP);
    let outcome = h.engine.apply_delayed_reward_update("ghost", &fv, 1.0).await;
    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("ghost"));
    assert_eq!(h.models.save_count(), 0);
}

#[tokio::test]
async fn reset_is_idempotent() {
    let h = harness();
    for i in 0..7 {
        h.engine
            .process_event("u", event_at(i, i % 2 == 0, 1800), ProcessOptions::default())
            .await;
    }

    h.engine.reset_user("u").await.unwrap();
    let first_model = h.models.get("u").unwrap();
    let first_state = h.engine.get_state("u").await.unwrap();

    h.engine.reset_user("u").await.unwrap();
    let second_model = h.models.get("u").unwrap();
    let second_state = h.engine.get_state("u").await.unwrap();

    assert_eq!(first_model, second_model);
    assert_eq!(first_model.update_count, 0);
    assert_eq!(first_state.attention, second_state.attention);
    assert_eq!(first_state.cold_start, second_state.cold_start);
    assert_eq!(
        h.engine.get_cold_start_phase("u").await,
        ColdStartPhase::Classify
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_events_and_rewards_never_lose_updates() {
    let h = harness();
    let seed = h
        .engine
        .process_event("u", event_at(0, true, 1500), ProcessOptions::default())
        .await;
    let fv = seed.feature_vector.unwrap();
    let baseline = h.models.get("u").unwrap().update_count;

    const EVENTS: i64 = 12;
    const REWARDS: usize = 8;
    let mut handles = Vec::new();
    for i in 1..=EVENTS {
        let engine = h.engine.clone();
        handles.push(tokio::spawn(async move {
            let r = engine
                .process_event("u", event_at(i, i % 3 != 0, 1500 + i * 50), ProcessOptions::default())
                .await;
            r.fallback_reason.is_none()
        }));
    }
    for i in 0..REWARDS {
        let engine = h.engine.clone();
        let fv = fv.clone();
        handles.push(tokio::spawn(async move {
            let reward = if i % 2 == 0 { 0.7 } else { -0.4 };
            engine.apply_delayed_reward_update("u", &fv, reward).await.success
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap());
    }

    let model = h.models.get("u").unwrap();
    assert_eq!(model.update_count, baseline + EVENTS as u64 + REWARDS as u64);
    assert!(model.is_finite());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn users_do_not_contaminate_each_other() {
    let h = harness();
    let mut handles = Vec::new();
    for (user, correct, rt) in [("alice", true, 1000), ("bob", false, 9000)] {
        let engine = h.engine.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..5 {
                engine
                    .process_event(user, event_at(i, correct, rt), ProcessOptions::default())
                    .await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let alice = h.engine.get_state("alice").await.unwrap();
    let bob = h.engine.get_state("bob").await.unwrap();
    let alice_cs = alice.cold_start.unwrap();
    let bob_cs = bob.cold_start.unwrap();

    assert!(alice_cs.results.iter().all(|r| r.is_correct));
    assert!(bob_cs.results.iter().all(|r| !r.is_correct));
    assert_eq!(alice_cs.user_type, Some(UserType::Fast));
    assert_eq!(bob_cs.user_type, Some(UserType::Cautious));
    assert_eq!(h.models.get("alice").unwrap().update_count, 5);
    assert_eq!(h.models.get("bob").unwrap().update_count, 5);
}

#[tokio::test]
async fn state_survives_a_cold_cache() {
    let h = harness();
    for i in 0..3 {
        h.engine
            .process_event("u", event_at(i, true, 1500), ProcessOptions::default())
            .await;
    }

    let restarted = AMASEngine::new(AMASConfig::default())
        .with_repositories(h.states.clone(), h.models.clone());
    assert_eq!(restarted.memory_stats().entries, 0);
    assert_eq!(
        restarted.get_cold_start_phase("u").await,
        ColdStartPhase::Classify
    );

    let result = restarted
        .process_event("u", event_at(3, true, 1500), ProcessOptions::default())
        .await;
    assert_eq!(result.state.cold_start.unwrap().probe_index, 4);
    assert_eq!(h.models.get("u").unwrap().update_count, 4);
}

#[tokio::test]
async fn skip_update_leaves_models_untouched() {
    let h = harness();
    h.engine
        .process_event("u", event_at(0, true, 1500), ProcessOptions::default())
        .await;
    let result = h
        .engine
        .process_event(
            "u",
            event_at(1, false, 1500),
            ProcessOptions {
                skip_update: true,
                ..Default::default()
            },
        )
        .await;
    assert!(result.fallback_reason.is_none());
    assert_eq!(result.state.cold_start.unwrap().probe_index, 1);
    assert_eq!(h.models.get("u").unwrap().update_count, 1);
}

#[tokio::test]
async fn tracer_receives_decisions() {
    let tracer = Arc::new(MemoryDecisionTracer::new());
    let engine = AMASEngine::new(AMASConfig::default()).with_tracer(tracer.clone());
    engine
        .process_event("u", event_at(0, true, 1500), ProcessOptions::default())
        .await;

    for _ in 0..50 {
        if !tracer.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    let traces = tracer.traces();
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].user_id, "u");
    assert_eq!(traces[0].decision_source, "coldstart");
}

#[tokio::test]
async fn sweep_never_deletes_persisted_state() {
    let mut config = AMASConfig::default();
    config.cache.ttl_ms = 1;
    let states = Arc::new(InMemoryStateRepository::new());
    let engine = AMASEngine::new(config)
        .with_repositories(states.clone(), Arc::new(InMemoryModelRepository::new()));

    engine
        .process_event("u", event_at(0, true, 1500), ProcessOptions::default())
        .await;
    tokio::time::sleep(Duration::from_millis(5)).await;

    assert_eq!(engine.sweep_now().expired, 1);
    assert_eq!(engine.memory_stats().entries, 0);
    assert!(states.get("u").is_some());
    assert!(engine.get_state("u").await.is_some());
}

#[tokio::test]
async fn swept_user_resumes_from_storage() {
    let mut config = AMASConfig::default();
    config.cache.ttl_ms = 1;
    let states = Arc::new(InMemoryStateRepository::new());
    let models = Arc::new(InMemoryModelRepository::new());
    let engine = AMASEngine::new(config).with_repositories(states.clone(), models.clone());

    for i in 0..2 {
        engine
            .process_event("u", event_at(i, true, 1500), ProcessOptions::default())
            .await;
    }
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(engine.sweep_now().expired, 1);

    let result = engine
        .process_event("u", event_at(2, true, 1500), ProcessOptions::default())
        .await;
    assert!(result.fallback_reason.is_none());
    assert_eq!(result.state.cold_start.unwrap().probe_index, 3);
    assert_eq!(models.get("u").unwrap().update_count, 3);
}

#[tokio::test]
async fn reset_user_matches_a_brand_new_user() {
    let h = harness();
    for i in 0..6 {
        h.engine
            .process_event("u", event_at(i, i % 2 == 0, 2200), ProcessOptions::default())
            .await;
    }
    h.engine.reset_user("u").await.unwrap();

    let later = chrono::Utc::now().timestamp_millis() + 3 * 86_400_000;
    let next = RawEvent {
        is_correct: true,
        response_time: 1600,
        dwell_time: Some(2000),
        timestamp: later,
        ..Default::default()
    };
    let reset = h
        .engine
        .process_event("u", next.clone(), ProcessOptions::default())
        .await;
    let fresh = h
        .engine
        .process_event("v", next, ProcessOptions::default())
        .await;

    assert!(reset.fallback_reason.is_none());
    assert_eq!(reset.state.conf, fresh.state.conf);
    assert_eq!(reset.state.attention, fresh.state.attention);
    assert_eq!(reset.state.fatigue, fresh.state.fatigue);
    assert_eq!(reset.state.motivation, fresh.state.motivation);
    assert_eq!(reset.state.cold_start, fresh.state.cold_start);
    assert_eq!(reset.strategy, fresh.strategy);
    assert_eq!(reset.reward.value, fresh.reward.value);
    assert_eq!(h.models.get("u"), h.models.get("v"));
}

#[tokio::test]
async fn reset_user_matches_a_brand_new_user_after_restart() {
    let h = harness();
    h.engine
        .process_event("u", event_at(0, false, 4000), ProcessOptions::default())
        .await;
    h.engine.reset_user("u").await.unwrap();

    let restarted = AMASEngine::new(AMASConfig::default())
        .with_repositories(h.states.clone(), h.models.clone());
    let later = chrono::Utc::now().timestamp_millis() + 2 * 86_400_000;
    let next = RawEvent {
        is_correct: true,
        response_time: 1600,
        timestamp: later,
        ..Default::default()
    };
    let reset = restarted
        .process_event("u", next.clone(), ProcessOptions::default())
        .await;
    let fresh = restarted
        .process_event("v", next, ProcessOptions::default())
        .await;

    assert_eq!(reset.state.conf, fresh.state.conf);
    assert_eq!(reset.state.cold_start, fresh.state.cold_start);
    assert_eq!(h.models.get("u"), h.models.get("v"));
}
