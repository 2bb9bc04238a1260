//! Request/response models and operations behind the seat REST endpoints.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::backends::{CallRepository, KvStore};
use crate::core::model::{CallPhase, ProjectId, SeatId, SeatState};
use crate::core::seat_store::SeatStateStore;
use crate::core::sweepers::{SeatStats, StatAggregator};
use crate::core::EngineError;
use crate::util::clock::now_micros;

/// Lock a seat for a call being handed over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockSeatRequest {
    /// Seat to lock.
    pub seat_id: SeatId,
    /// Call bridging to it.
    pub call_id: String,
}

/// Result of [`SeatApi::lock_seat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSeatResponse {
    /// Whether the seat is now locked for the call.
    pub locked: bool,
}

/// Release the seat of a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockSeatRequest {
    /// Seat to release; resolved from the call when absent.
    #[serde(default)]
    pub seat_id: Option<SeatId>,
    /// Call that held the seat.
    pub call_id: String,
}

/// Result of [`SeatApi::unlock_seat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockSeatResponse {
    /// Whether a lock was released.
    pub unlocked: bool,
}

/// Toggle pre-ready on a seat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreReadyRequest {
    /// Seat to flag.
    pub seat_id: SeatId,
    /// New pre-ready flag.
    pub pre_ready: bool,
}

/// Live seats of one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSeatStatus {
    /// Project queried.
    pub project_id: ProjectId,
    /// Seats listing the project.
    pub seats: Vec<SeatState>,
    /// How many of them are checked in.
    pub checked_in: usize,
    /// How many are ready.
    pub ready: usize,
    /// How many are on a call.
    pub locked: usize,
}

/// Today's statistics of one seat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatStatsEntry {
    /// Seat.
    pub seat_id: SeatId,
    /// Its statistics.
    #[serde(flatten)]
    pub stats: SeatStats,
}

/// Operations the console and the robot call over HTTP.
pub struct SeatApi<R, K> {
    repo: Arc<R>,
    seats: Arc<SeatStateStore<K>>,
    stats: Arc<StatAggregator<R>>,
}

impl<R, K> SeatApi<R, K>
where
    R: CallRepository,
    K: KvStore,
{
    /// Create the operation set.
    pub const fn new(
        repo: Arc<R>,
        seats: Arc<SeatStateStore<K>>,
        stats: Arc<StatAggregator<R>>,
    ) -> Self {
        Self { repo, seats, stats }
    }

    /// Lock a ready seat for a live call and attach it to the call record.
    ///
    /// Calls that are unknown or whose customer leg is already reconciled are refused, so a
    /// late lock cannot strand a seat. The call is read again after the seat is attached; a
    /// customer leg reconciled in between releases the seat here.
    pub async fn lock_seat(&self, req: &LockSeatRequest) -> Result<LockSeatResponse, EngineError> {
        let refused = Ok(LockSeatResponse { locked: false });
        let Some(call) = self.repo.find_call(&req.call_id, None).await? else {
            tracing::warn!(call = %req.call_id, seat = req.seat_id, "lock for unknown call");
            return refused;
        };
        if call.phase != CallPhase::AwaitingLeg1 {
            tracing::warn!(call = %call.id, seat = req.seat_id, "lock for finished call");
            return refused;
        }
        if call.seat_id.is_some_and(|s| s != req.seat_id) {
            return refused;
        }
        if !self.seats.lock_seat(req.seat_id, &call.id).await? {
            return refused;
        }
        if !self.repo.attach_seat(&call.id, req.seat_id, now_micros()).await? {
            tracing::warn!(call = %call.id, seat = req.seat_id, "call taken by another seat");
            self.seats.unlock_seat(Some(req.seat_id), &call.id).await?;
            return refused;
        }
        let current = self.repo.find_call(&call.id, None).await?;
        if current.is_none_or(|c| c.phase != CallPhase::AwaitingLeg1) {
            tracing::warn!(call = %call.id, seat = req.seat_id, "call finished during lock");
            self.seats.unlock_seat(Some(req.seat_id), &call.id).await?;
            return refused;
        }
        Ok(LockSeatResponse { locked: true })
    }

    /// Release the seat held by a call.
    pub async fn unlock_seat(
        &self,
        req: &UnlockSeatRequest,
    ) -> Result<UnlockSeatResponse, EngineError> {
        let unlocked = self.seats.unlock_seat(req.seat_id, &req.call_id).await?;
        Ok(UnlockSeatResponse { unlocked })
    }

    /// Seats serving `project_id` with summary counts.
    pub async fn project_seat_status(
        &self,
        project_id: ProjectId,
    ) -> Result<ProjectSeatStatus, EngineError> {
        let mut seats: Vec<SeatState> = self
            .seats
            .all()
            .await?
            .into_iter()
            .filter(|s| s.projects.contains(&project_id))
            .collect();
        seats.sort_by_key(|s| s.seat_id);
        Ok(ProjectSeatStatus {
            project_id,
            checked_in: seats.iter().filter(|s| s.checked_in).count(),
            ready: seats.iter().filter(|s| s.ready).count(),
            locked: seats.iter().filter(|s| s.locked).count(),
            seats,
        })
    }

    /// Set or clear pre-ready on a checked-in seat.
    pub async fn set_pre_ready(&self, req: &PreReadyRequest) -> Result<SeatState, EngineError> {
        self.seats.set_pre_ready(req.seat_id, req.pre_ready).await
    }

    /// Today's statistics of every seat with completed calls, by seat id.
    pub fn seat_stats(&self) -> Vec<SeatStatsEntry> {
        let mut entries: Vec<SeatStatsEntry> = self
            .stats
            .all()
            .into_iter()
            .map(|(seat_id, stats)| SeatStatsEntry { seat_id, stats })
            .collect();
        entries.sort_by_key(|e| e.seat_id);
        entries
    }
}
