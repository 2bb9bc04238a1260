//! Task spawning, supervised engine loops and the REST operation surface.

pub mod api;
pub mod supervisor;
pub mod tokio_spawner;
pub mod workers;

pub use api::SeatApi;
pub use supervisor::{supervise, LoopPolicy, Pass, Supervisor, Worker};
pub use tokio_spawner::{Spawn, TokioSpawner};
pub use workers::PushTick;
