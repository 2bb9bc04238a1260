//! Persistent and ephemeral records the engine reads and mutates.

use serde::{Deserialize, Serialize};

use crate::core::durations::{CallDurations, CallTimes};
use crate::core::outcome::OutcomeLabel;
use crate::core::EngineError;

/// Project identifier.
pub type ProjectId = u64;
/// Order identifier.
pub type OrderId = u64;
/// Seat (human agent position) identifier.
pub type SeatId = u64;

/// Outbound campaign with seat-derived capacity coefficients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Project identifier.
    pub id: ProjectId,
    /// Concurrent calls one idle seat can absorb.
    pub spare_coefficient: u32,
    /// Extra concurrent calls a seat that is already on a call can absorb.
    pub busy_coefficient: u32,
    /// Whether the campaign is currently dialing.
    pub running: bool,
    /// Robot assigned to the first leg of every call.
    pub robot_id: Option<u64>,
    /// Seats assigned to the project.
    pub seat_ids: Vec<SeatId>,
}

impl Project {
    /// Capacity one seat contributes to this project. Never negative by construction.
    pub const fn seat_contribution(&self, locked: bool) -> u32 {
        if locked {
            self.busy_coefficient.saturating_add(1)
        } else {
            self.spare_coefficient
        }
    }
}

/// Lifecycle of an order. Variants are declared in transition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Uploaded, not yet dialed.
    Waiting,
    /// Pushed to the switch, call in flight.
    Processing,
    /// Completed or given up.
    Finished,
}

impl OrderStatus {
    /// Move to `next`, refusing any regression. Re-applying the current status is allowed.
    pub fn advance(self, next: Self) -> Result<Self, EngineError> {
        if next < self {
            return Err(EngineError::Invalid(format!(
                "order status cannot move from {self:?} to {next:?}"
            )));
        }
        Ok(next)
    }
}

/// A unit of outbound-call work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Order identifier.
    pub id: OrderId,
    /// Owning project.
    pub project_id: ProjectId,
    /// Number to dial.
    pub phone: String,
    /// Current status.
    pub status: OrderStatus,
    /// Last status change, milliseconds since epoch.
    pub updated_at_ms: u128,
}

/// Which segment of a call a completion event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Leg {
    /// Robot talking to the customer; carries the originating call id.
    Customer,
    /// Agent leg bridged to the customer.
    Agent,
}

/// Reconciliation progress of a call across its two legs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPhase {
    /// Customer leg not yet reported.
    #[default]
    AwaitingLeg1,
    /// Customer leg reported, agent leg still outstanding.
    AwaitingLeg2,
    /// All expected legs reported.
    Done,
}

impl CallPhase {
    /// Phase after applying `leg`, or `None` when the event is a duplicate.
    ///
    /// `seat_attached` is true when a seat was bridged into the call; `agent_applied` when
    /// its agent leg has already been recorded. An agent leg is applied once whatever the
    /// phase, so one that arrives after a call closed without a seat is still kept.
    pub const fn advance(self, leg: Leg, seat_attached: bool, agent_applied: bool) -> Option<Self> {
        match (self, leg) {
            (Self::AwaitingLeg1, Leg::Customer) => {
                if seat_attached && !agent_applied {
                    Some(Self::AwaitingLeg2)
                } else {
                    Some(Self::Done)
                }
            }
            (_, Leg::Agent) if agent_applied => None,
            (Self::AwaitingLeg1, Leg::Agent) => Some(Self::AwaitingLeg1),
            (Self::AwaitingLeg2 | Self::Done, Leg::Agent) => Some(Self::Done),
            (Self::AwaitingLeg2 | Self::Done, Leg::Customer) => None,
        }
    }
}

/// Record of one phone interaction, possibly spanning a robot and a human leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    /// `{project}-{uuid}`, also the switch origination id of the customer leg.
    pub id: String,
    /// Switch id of the agent leg, once seen.
    pub bridge_id: Option<String>,
    /// The single order this call serves.
    pub order_id: OrderId,
    /// Project derived from the id at creation.
    pub project_id: ProjectId,
    /// Seat bridged into the call, if any.
    pub seat_id: Option<SeatId>,
    /// Dialed number.
    pub phone: String,
    /// Call-flow timestamps.
    pub times: CallTimes,
    /// Durations derived from `times`.
    pub durations: CallDurations,
    /// Classified result of the customer leg.
    pub outcome: Option<OutcomeLabel>,
    /// Recording path relative to the recording root.
    pub audio_path: Option<String>,
    /// Line the agent leg went out on.
    pub line_name: Option<String>,
    /// Reconciliation phase.
    pub phase: CallPhase,
    /// Creation time, milliseconds since epoch.
    pub created_at_ms: u128,
}

impl Call {
    /// Build the id for a new call of `project`.
    pub fn new_id(project: ProjectId) -> String {
        format!("{project}-{}", uuid::Uuid::new_v4())
    }

    /// Recover the project from a call id built by [`Call::new_id`].
    pub fn project_of(id: &str) -> Option<ProjectId> {
        id.split_once('-').and_then(|(p, _)| p.parse().ok())
    }

    /// Fresh call for `order`, seat unset.
    pub fn for_order(order: &Order, created_at_ms: u128) -> Self {
        Self {
            id: Self::new_id(order.project_id),
            bridge_id: None,
            order_id: order.id,
            project_id: order.project_id,
            seat_id: None,
            phone: order.phone.clone(),
            times: CallTimes::default(),
            durations: CallDurations::default(),
            outcome: None,
            audio_path: None,
            line_name: None,
            phase: CallPhase::AwaitingLeg1,
            created_at_ms,
        }
    }

    /// Phase after applying `leg` to this call, or `None` for a duplicate.
    pub const fn next_phase(&self, leg: Leg) -> Option<CallPhase> {
        self.phase
            .advance(leg, self.seat_id.is_some(), self.bridge_id.is_some())
    }
}

/// Column-level update applied to a stored call. `None` leaves a column untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallPatch {
    /// New agent-leg id.
    pub bridge_id: Option<String>,
    /// New timestamps; only `Some` fields overwrite.
    pub times: CallTimes,
    /// Recomputed durations.
    pub durations: Option<CallDurations>,
    /// New outcome label.
    pub outcome: Option<OutcomeLabel>,
    /// New recording path.
    pub audio_path: Option<String>,
    /// New agent line.
    pub line_name: Option<String>,
    /// New phase.
    pub phase: Option<CallPhase>,
}

impl CallPatch {
    /// Apply the patch to an in-memory call.
    pub fn apply_to(&self, call: &mut Call) {
        if let Some(bridge) = &self.bridge_id {
            call.bridge_id = Some(bridge.clone());
        }
        call.times = call.times.merged(&self.times);
        if let Some(durations) = self.durations {
            call.durations = durations;
        }
        if let Some(outcome) = self.outcome {
            call.outcome = Some(outcome);
        }
        if let Some(path) = &self.audio_path {
            call.audio_path = Some(path.clone());
        }
        if let Some(line) = &self.line_name {
            call.line_name = Some(line.clone());
        }
        if let Some(phase) = self.phase {
            call.phase = phase;
        }
    }
}

/// Ephemeral live state of one seat, serialized to clients in camelCase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatState {
    /// Seat identifier.
    pub seat_id: SeatId,
    /// Operator is signed in at the seat.
    pub checked_in: bool,
    /// Operator will become ready when the current call ends.
    pub pre_ready: bool,
    /// Operator accepts new calls.
    pub ready: bool,
    /// A call is bridging through the seat.
    pub locked: bool,
    /// Projects the operator serves.
    pub projects: Vec<ProjectId>,
    /// Call currently bridged through the seat.
    pub call_id: Option<String>,
    /// Last time the seat became available, milliseconds since epoch.
    pub ready_timestamp: Option<u128>,
}

impl SeatState {
    /// Zero-value state for a seat never seen before.
    pub fn empty(seat_id: SeatId) -> Self {
        Self {
            seat_id,
            ..Self::default()
        }
    }

    /// Whether this seat contributes capacity to its projects.
    pub const fn is_available(&self) -> bool {
        self.checked_in && (self.ready || self.pre_ready)
    }
}

/// One pending switch push recorded in the dispatch transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEntry {
    /// Outbox row id.
    pub id: u64,
    /// Order the push dials.
    pub order_id: OrderId,
    /// Serialized push message.
    pub message: String,
}

/// Everything the dispatch transaction writes.
#[derive(Debug, Clone, Default)]
pub struct DispatchBatch {
    /// New calls, seat unset.
    pub calls: Vec<Call>,
    /// Orders to move to processing.
    pub order_ids: Vec<OrderId>,
    /// `(order, serialized push message)` pairs written to the outbox.
    pub messages: Vec<(OrderId, String)>,
}
