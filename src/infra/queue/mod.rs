//! Switch queue backends.

pub mod memory;

pub use memory::InMemorySwitchQueue;
