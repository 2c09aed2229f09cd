pub mod amas;
pub mod config;
pub mod logging;

pub use amas::{AMASConfig, AMASEngine};
