//! # Seat Dispatch
//!
//! Admission control, call reconciliation and live seat state for an outbound call center.
//!
//! A robot dials customers; when the robot decides a human should take over, the call is
//! bridged to a seat (a human agent position). The engine keeps three loops honest:
//!
//! - **Admission**: each tick the [`core::CapacityPlanner`] sizes how many waiting orders may
//!   be dialed from switch queue depth, robot load and the seats that are checked in and
//!   ready. The [`core::OrderDispatcher`] commits the admitted orders with an outbox and
//!   pushes them to the switch.
//! - **Reconciliation**: the [`core::CdrReconciler`] correlates the switch's per-leg
//!   completion events with calls, derives durations and outcome labels, finishes orders and
//!   releases seats.
//! - **Seat state**: the [`core::SeatStateStore`] holds every seat's live flags behind
//!   versioned writes; the [`hub::SeatConnectionHub`] pushes every change to all of the
//!   seat's connected clients.
//!
//! ```rust,ignore
//! use seat_dispatch::builders::build_in_memory_engine;
//! use seat_dispatch::config::EngineConfig;
//! use seat_dispatch::runtime::TokioSpawner;
//!
//! let cfg = EngineConfig::from_env()?;
//! let listener = tokio::net::TcpListener::bind(cfg.listen_addr).await?;
//! let (engine, _backends) = build_in_memory_engine(cfg)?;
//! if let Some(spawner) = TokioSpawner::current() {
//!     engine.start(&spawner);
//! }
//! axum::serve(listener, engine.router()).await?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Domain model, admission control, dispatch, reconciliation and seat state.
pub mod core;
/// Engine configuration.
pub mod config;
/// Builders that wire configuration and backends into an engine.
pub mod builders;
/// Live seat connections and the HTTP surface.
pub mod hub;
/// In-memory backends for queues, the key/value store and the repository.
pub mod infra;
/// Spawning, supervised loops and REST operations.
pub mod runtime;
/// Shared utilities.
pub mod util;
