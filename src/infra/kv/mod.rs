//! Key/value store backends.

pub mod memory;

pub use memory::InMemoryKvStore;
