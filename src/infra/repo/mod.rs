//! Call repository backends.

#[cfg(test)]
pub mod faulty;
pub mod memory;

pub use memory::InMemoryRepository;
