//! Engine configuration: defaults, validation, JSON and environment loading.

pub mod engine;

pub use engine::{EngineConfig, ENV_PREFIX};
