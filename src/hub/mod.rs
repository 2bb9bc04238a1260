//! Live seat connections: wire protocol, per-seat fan-out and the axum adapter.

pub mod connection;
pub mod protocol;
pub mod routes;
pub mod seat_hub;
pub mod ws;

pub use connection::{ConnectionId, SeatConnection};
pub use protocol::{ClientFrame, ServerFrame};
pub use routes::{router, ApiError, AppState};
pub use seat_hub::SeatConnectionHub;
pub use ws::{serve_socket, SocketSettings};
