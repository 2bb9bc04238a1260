//! Infrastructure adapters for the switch queues, the seat key/value store and the call
//! repository.

pub mod kv;
pub mod queue;
pub mod repo;

pub use kv::InMemoryKvStore;
pub use queue::InMemorySwitchQueue;
pub use repo::InMemoryRepository;
