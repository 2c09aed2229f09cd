pub mod attention;
pub mod cognitive;
pub mod estimator;
pub mod fatigue;
pub mod features;
pub mod motivation;
pub mod trend;

pub use attention::AttentionMonitor;
pub use cognitive::CognitiveProfiler;
pub use estimator::{apply_decay, StateEstimator, SubModels};
pub use fatigue::FatigueEstimator;
pub use features::{
    context_vector, EventWindow, FeatureExtractor, FeatureSet, WindowFeatureExtractor,
};
pub use motivation::MotivationTracker;
pub use trend::TrendAnalyzer;
