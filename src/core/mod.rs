//! Domain model, admission control, dispatch, reconciliation and seat state.

pub mod backends;
pub mod cdr;
pub mod dispatcher;
pub mod durations;
pub mod error;
pub mod model;
pub mod outcome;
pub mod planner;
pub mod reconciler;
pub mod seat_store;
pub mod sweepers;

pub use backends::{CallRepository, Delivery, KvStore, SwitchQueue, Versioned};
pub use dispatcher::{DispatchReport, OrderDispatcher, PushMessage};
pub use error::{AppResult, EngineError};
pub use planner::{CapacityPlanner, PlannerLimits, TickOutcome, TickPlan};
pub use reconciler::{CdrReconciler, ReconcileOutcome};
pub use seat_store::{ChangeKind, SeatChange, SeatStateStore};
pub use sweepers::{OrderReaper, ProjectCloser, SeatStats, StatAggregator};
