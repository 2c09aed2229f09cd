pub mod config;
pub mod decision;
pub mod engine;
pub mod error;
pub mod isolation;
pub mod modeling;
pub mod persistence;
pub mod resilience;
pub mod types;

pub use config::AMASConfig;
pub use engine::AMASEngine;
pub use error::{AmasError, Result};
