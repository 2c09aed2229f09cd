pub mod actions;
pub mod coldstart;
pub mod ensemble;
pub mod guardrails;
pub mod heuristic;
pub mod linucb;
pub mod matrix;
pub mod thompson;

pub use actions::ActionSpace;
pub use coldstart::ColdStartManager;
pub use ensemble::{EnsembleArbiter, Member, Vote};
pub use guardrails::{apply_guardrails, GuardrailOutcome, GuardrailRule};
pub use heuristic::HeuristicLearner;
pub use linucb::{BanditModel, LinUCBModel};
pub use thompson::ThompsonSamplingModel;

use crate::amas::config::{AMASConfig, DecisionModelKind};
use crate::amas::types::{FeatureVector, StrategyParams, UserState};

const BANDIT_MIN_CONFIDENCE: f64 = 0.2;
const BANDIT_MAX_CONFIDENCE: f64 = 0.95;

/// What a decision model proposes for the next step.
#[derive(Debug, Clone)]
pub struct Selection {
    pub strategy: StrategyParams,
    pub confidence: f64,
    pub source: &'static str,
    pub votes: Vec<Vote>,
}

/// The configured decision policy. The ridge bandit itself lives next to it
/// in the user's model set because it is always trained and persisted.
#[derive(Debug, Clone)]
pub enum DecisionModel {
    Bandit,
    Ensemble {
        arbiter: EnsembleArbiter,
        thompson: ThompsonSamplingModel,
        heuristic: HeuristicLearner,
    },
    Thompson(ThompsonSamplingModel),
}

impl DecisionModel {
    pub fn from_config(config: &AMASConfig) -> Self {
        match config.decision_model {
            DecisionModelKind::Bandit => Self::Bandit,
            DecisionModelKind::Ensemble => Self::Ensemble {
                arbiter: EnsembleArbiter::new(&config.ensemble),
                thompson: ThompsonSamplingModel::with_context(&config.thompson_context),
                heuristic: HeuristicLearner::default(),
            },
            DecisionModelKind::Thompson => {
                Self::Thompson(ThompsonSamplingModel::with_context(&config.thompson_context))
            }
        }
    }

    pub fn kind(&self) -> DecisionModelKind {
        match self {
            Self::Bandit => DecisionModelKind::Bandit,
            Self::Ensemble { .. } => DecisionModelKind::Ensemble,
            Self::Thompson(_) => DecisionModelKind::Thompson,
        }
    }

    pub fn select(
        &mut self,
        bandit: &mut LinUCBModel,
        state: &UserState,
        context: &FeatureVector,
        space: &ActionSpace,
        current: &StrategyParams,
    ) -> Option<Selection> {
        match self {
            Self::Bandit => {
                let (strategy, confidence) = bandit_vote(bandit, context, space)?;
                Some(Selection {
                    votes: vec![Vote {
                        member: Member::Bandit,
                        strategy: strategy.clone(),
                        confidence,
                        weight: 1.0,
                    }],
                    strategy,
                    confidence,
                    source: "bandit",
                })
            }
            Self::Thompson(thompson) => {
                let (strategy, confidence) = thompson.select_action(state, space.actions())?;
                Some(Selection {
                    votes: vec![Vote {
                        member: Member::Thompson,
                        strategy: strategy.clone(),
                        confidence,
                        weight: 1.0,
                    }],
                    strategy,
                    confidence,
                    source: "thompson",
                })
            }
            Self::Ensemble {
                arbiter,
                thompson,
                heuristic,
            } => {
                let mut proposals = Vec::with_capacity(3);
                if let Some((s, c)) = bandit_vote(bandit, context, space) {
                    proposals.push((Member::Bandit, s, c));
                }
                if let Some((s, c)) = thompson.select_action(state, space.actions()) {
                    proposals.push((Member::Thompson, s, c));
                }
                proposals.push((
                    Member::Heuristic,
                    heuristic.suggest(state, current),
                    heuristic.confidence(state),
                ));

                let strategy = arbiter.decide(proposals)?;
                Some(Selection {
                    strategy,
                    confidence: arbiter.last_confidence(),
                    source: "ensemble",
                    votes: arbiter.last_votes().to_vec(),
                })
            }
        }
    }

    /// Credits the executed strategy. `state` is the state it was chosen under.
    pub fn update(&mut self, state: &UserState, executed: &StrategyParams, reward: f64) {
        match self {
            Self::Bandit => {}
            Self::Thompson(thompson) => thompson.update(state, executed, reward),
            Self::Ensemble {
                arbiter, thompson, ..
            } => {
                thompson.update(state, executed, reward);
                arbiter.update(executed, reward);
            }
        }
    }

    pub fn ensemble(&self) -> Option<&EnsembleArbiter> {
        match self {
            Self::Ensemble { arbiter, .. } => Some(arbiter),
            _ => None,
        }
    }
}

fn bandit_vote(
    bandit: &mut LinUCBModel,
    context: &FeatureVector,
    space: &ActionSpace,
) -> Option<(StrategyParams, f64)> {
    let (strategy, _) = bandit.select_action(context, space.actions())?;
    let x = bandit.build_input(context, &strategy);
    let confidence = bandit.confidence_for(&x, BANDIT_MIN_CONFIDENCE, BANDIT_MAX_CONFIDENCE);
    Some((strategy, confidence))
}
