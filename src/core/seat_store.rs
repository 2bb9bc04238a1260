//! Authoritative live state of every seat.
//!
//! State lives in the shared key/value store under `seat_state:{id}`. Writes are conditional
//! on the version read, so concurrent writers from any number of processes retry instead of
//! overwriting each other, the same reserve-by-CAS loop the pool uses for capacity units.
//! Every successful write is published on an in-process change feed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::core::backends::KvStore;
use crate::core::model::{SeatId, SeatState};
use crate::core::EngineError;
use crate::util::clock::now_ms;

const SEAT_PREFIX: &str = "seat_state:";
const CALL_PREFIX: &str = "call_seat:";
const MAX_WRITE_ATTEMPTS: usize = 1_000;
const CHANGE_FEED_CAPACITY: usize = 1_024;

/// What caused a seat write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Check-in, readiness or other flag change.
    Updated,
    /// A call started bridging through the seat.
    Locked,
    /// The bridged call ended.
    Unlocked,
}

/// A committed seat write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatChange {
    /// State after the write.
    pub state: SeatState,
    /// Cause of the write.
    pub kind: ChangeKind,
}

/// Seat state store over a shared [`KvStore`].
pub struct SeatStateStore<K> {
    kv: Arc<K>,
    call_seat_ttl: Duration,
    changes: broadcast::Sender<SeatChange>,
}

fn seat_key(seat: SeatId) -> String {
    format!("{SEAT_PREFIX}{seat}")
}

fn call_key(call: &str) -> String {
    format!("{CALL_PREFIX}{call}")
}

impl<K: KvStore> SeatStateStore<K> {
    /// Create a store; `call_seat_ttl` bounds the lifetime of the call→seat mapping.
    pub fn new(kv: Arc<K>, call_seat_ttl: Duration) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            kv,
            call_seat_ttl,
            changes,
        }
    }

    /// Subscribe to committed writes.
    pub fn subscribe(&self) -> broadcast::Receiver<SeatChange> {
        self.changes.subscribe()
    }

    /// Current state; a zero-value state when the seat was never written.
    pub async fn get(&self, seat: SeatId) -> Result<SeatState, EngineError> {
        Ok(self.load(seat).await?.0)
    }

    /// Every stored seat. Undecodable entries are skipped.
    pub async fn all(&self) -> Result<Vec<SeatState>, EngineError> {
        let entries = self.kv.scan_prefix(SEAT_PREFIX).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(key, value)| match serde_json::from_str(&value) {
                Ok(state) => Some(state),
                Err(e) => {
                    tracing::warn!(%key, error = %e, "skipping undecodable seat state");
                    None
                }
            })
            .collect())
    }

    /// Read-modify-write one seat. `mutate` returns `None` to skip the write and may run more
    /// than once if another writer gets in first. When `ready` turns on, the ready timestamp is
    /// stamped.
    pub async fn update<F>(&self, seat: SeatId, mutate: F) -> Result<Option<SeatState>, EngineError>
    where
        F: FnMut(&SeatState) -> Option<SeatState> + Send,
    {
        self.write(seat, ChangeKind::Updated, mutate).await
    }

    /// Lock a ready, checked-in, unlocked seat for `call`. Returns false and writes nothing
    /// otherwise.
    ///
    /// The call→seat mapping is written after the lock. If that write fails the lock is
    /// rolled back to the seat's previous flags and the error is returned, so a seat is never
    /// left locked for a call nothing can resolve to it.
    pub async fn lock_seat(&self, seat: SeatId, call: &str) -> Result<bool, EngineError> {
        let mut prior = (false, false);
        let locked = self
            .write(seat, ChangeKind::Locked, |cur| {
                if !(cur.ready && cur.checked_in && !cur.locked) {
                    return None;
                }
                prior = (cur.ready, cur.pre_ready);
                let mut next = cur.clone();
                next.locked = true;
                next.call_id = Some(call.to_string());
                next.ready = false;
                next.pre_ready = false;
                Some(next)
            })
            .await?;
        if locked.is_none() {
            return Ok(false);
        }
        if let Err(e) = self
            .kv
            .set_ex(&call_key(call), seat.to_string(), self.call_seat_ttl)
            .await
        {
            tracing::warn!(seat, call, error = %e, "call mapping not stored, rolling back lock");
            let (ready, pre_ready) = prior;
            self.write(seat, ChangeKind::Unlocked, |cur| {
                if !cur.locked || cur.call_id.as_deref() != Some(call) {
                    return None;
                }
                let mut next = cur.clone();
                next.locked = false;
                next.call_id = None;
                next.ready = ready;
                next.pre_ready = pre_ready;
                Some(next)
            })
            .await?;
            return Err(e);
        }
        tracing::info!(seat, call, "seat locked");
        Ok(true)
    }

    /// Release the seat locked for `call`. Without a seat, the call→seat mapping resolves it.
    /// A seat that is not locked for this call is left alone. A pre-ready seat becomes ready.
    pub async fn unlock_seat(&self, seat: Option<SeatId>, call: &str) -> Result<bool, EngineError> {
        let seat = match seat {
            Some(seat) => Some(seat),
            None => self
                .kv
                .get(&call_key(call))
                .await?
                .and_then(|v| v.value.parse::<SeatId>().ok()),
        };
        let Some(seat) = seat else {
            tracing::debug!(call, "no seat mapped to call");
            return Ok(false);
        };

        let unlocked = self
            .write(seat, ChangeKind::Unlocked, |cur| {
                if !cur.locked || cur.call_id.as_deref() != Some(call) {
                    return None;
                }
                let mut next = cur.clone();
                next.locked = false;
                next.call_id = None;
                next.ready = cur.ready || cur.pre_ready;
                next.pre_ready = false;
                next.ready_timestamp = Some(now_ms());
                Some(next)
            })
            .await?;
        if unlocked.is_none() {
            return Ok(false);
        }
        self.kv.delete(&call_key(call)).await?;
        tracing::info!(seat, call, "seat unlocked");
        Ok(true)
    }

    /// Flag a checked-in seat to become ready once its current call ends.
    pub async fn set_pre_ready(&self, seat: SeatId, pre_ready: bool) -> Result<SeatState, EngineError> {
        let current = self.get(seat).await?;
        if pre_ready && !current.checked_in {
            return Err(EngineError::Invalid(format!("seat {seat} is not checked in")));
        }
        let updated = self
            .update(seat, |cur| {
                if pre_ready && !cur.checked_in {
                    return None;
                }
                let mut next = cur.clone();
                next.pre_ready = pre_ready;
                Some(next)
            })
            .await?;
        updated.ok_or_else(|| EngineError::Invalid(format!("seat {seat} is not checked in")))
    }

    async fn load(&self, seat: SeatId) -> Result<(SeatState, u64), EngineError> {
        match self.kv.get(&seat_key(seat)).await? {
            Some(stored) => Ok((serde_json::from_str(&stored.value)?, stored.version)),
            None => Ok((SeatState::empty(seat), 0)),
        }
    }

    async fn write<F>(
        &self,
        seat: SeatId,
        kind: ChangeKind,
        mut mutate: F,
    ) -> Result<Option<SeatState>, EngineError>
    where
        F: FnMut(&SeatState) -> Option<SeatState> + Send,
    {
        let key = seat_key(seat);
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let (current, version) = self.load(seat).await?;
            let Some(mut next) = mutate(&current) else {
                return Ok(None);
            };
            next.seat_id = seat;
            if next.ready && !current.ready {
                next.ready_timestamp = Some(now_ms());
            }
            let body = serde_json::to_string(&next)?;
            if self.kv.compare_and_set(&key, version, body).await? {
                let _ = self.changes.send(SeatChange {
                    state: next.clone(),
                    kind,
                });
                return Ok(Some(next));
            }
            tokio::task::yield_now().await;
        }
        Err(EngineError::Conflict(key))
    }
}
