//! Builders that turn configuration and backends into a runnable engine.

pub mod engine_builder;

pub use engine_builder::{
    build_engine, build_in_memory_engine, Engine, InMemoryBackends, InMemoryEngine,
};
