//! Periodic housekeeping: stale orders, idle projects and per-seat daily statistics.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::core::backends::{CallRepository, KvStore};
use crate::core::model::{OrderId, ProjectId, SeatId};
use crate::core::seat_store::SeatStateStore;
use crate::core::EngineError;
use crate::util::clock::{day_start_ms, now_ms};

/// Finishes orders stuck in processing, e.g. after a lost completion event.
pub struct OrderReaper<R> {
    repo: Arc<R>,
    stale_after: Duration,
}

impl<R: CallRepository> OrderReaper<R> {
    /// Reap orders whose last change is older than `stale_after`.
    pub const fn new(repo: Arc<R>, stale_after: Duration) -> Self {
        Self { repo, stale_after }
    }

    /// Finish every stale processing order; returns the ids finished.
    pub async fn sweep(&self) -> Result<Vec<OrderId>, EngineError> {
        let cutoff = now_ms().saturating_sub(self.stale_after.as_millis());
        let reaped = self.repo.finish_stale_orders(cutoff).await?;
        if !reaped.is_empty() {
            tracing::warn!(count = reaped.len(), "finished stale orders");
        }
        Ok(reaped)
    }
}

/// Stops running projects that no checked-in seat serves.
pub struct ProjectCloser<R, K> {
    repo: Arc<R>,
    seats: Arc<SeatStateStore<K>>,
}

impl<R: CallRepository, K: KvStore> ProjectCloser<R, K> {
    /// Create a closer.
    pub const fn new(repo: Arc<R>, seats: Arc<SeatStateStore<K>>) -> Self {
        Self { repo, seats }
    }

    /// Close every unattended running project; returns the ids closed.
    pub async fn sweep(&self) -> Result<Vec<ProjectId>, EngineError> {
        let attended: HashSet<ProjectId> = self
            .seats
            .all()
            .await?
            .into_iter()
            .filter(|s| s.checked_in)
            .flat_map(|s| s.projects)
            .collect();

        let mut closed = Vec::new();
        for project in self.repo.running_projects().await? {
            if attended.contains(&project.id) {
                continue;
            }
            self.repo.set_project_running(project.id, false).await?;
            tracing::info!(project = project.id, "closed project with no seats");
            closed.push(project.id);
        }
        Ok(closed)
    }
}

/// Calls and talk time of one seat for the current day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatStats {
    /// Completed calls bridged through the seat.
    pub calls: u32,
    /// Sum of seat talk time, seconds.
    pub talk_secs: u64,
}

/// Keeps a snapshot of today's per-seat statistics.
pub struct StatAggregator<R> {
    repo: Arc<R>,
    snapshot: RwLock<HashMap<SeatId, SeatStats>>,
}

impl<R: CallRepository> StatAggregator<R> {
    /// Create an aggregator with an empty snapshot.
    pub fn new(repo: Arc<R>) -> Self {
        Self {
            repo,
            snapshot: RwLock::new(HashMap::new()),
        }
    }

    /// Recompute the snapshot from today's completed seat calls.
    pub async fn refresh(&self) -> Result<usize, EngineError> {
        let since = day_start_ms(now_ms());
        let calls = self.repo.completed_seat_calls_since(since).await?;
        let mut stats: HashMap<SeatId, SeatStats> = HashMap::new();
        for call in calls {
            let Some(seat) = call.seat_id else { continue };
            let entry = stats.entry(seat).or_default();
            entry.calls += 1;
            entry.talk_secs += u64::from(call.durations.seat_call);
        }
        let seats = stats.len();
        *self.snapshot.write() = stats;
        tracing::debug!(seats, "seat stats refreshed");
        Ok(seats)
    }

    /// Last computed stats of `seat`; zero when it had no calls.
    pub fn get(&self, seat: SeatId) -> SeatStats {
        self.snapshot.read().get(&seat).copied().unwrap_or_default()
    }

    /// Last computed stats of every seat with calls.
    pub fn all(&self) -> HashMap<SeatId, SeatStats> {
        self.snapshot.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{Call, CallPhase, OrderStatus, Project};
    use crate::infra::{InMemoryKvStore, InMemoryRepository};

    fn project(id: ProjectId, running: bool) -> Project {
        Project {
            id,
            spare_coefficient: 1,
            busy_coefficient: 0,
            running,
            robot_id: None,
            seat_ids: vec![],
        }
    }

    #[tokio::test]
    async fn reaper_finishes_only_stale_processing_orders() {
        let repo = Arc::new(InMemoryRepository::new());
        let stale = repo.add_waiting_order(1, "1");
        let fresh = repo.add_waiting_order(1, "2");
        let waiting = repo.add_waiting_order(1, "3");

        let mut order = repo.order(stale).unwrap();
        order.status = OrderStatus::Processing;
        order.updated_at_ms = now_ms() - 2 * 3_600_000;
        repo.insert_order(order);
        let mut order = repo.order(fresh).unwrap();
        order.status = OrderStatus::Processing;
        repo.insert_order(order);

        let reaper = OrderReaper::new(Arc::clone(&repo), Duration::from_secs(3_600));
        assert_eq!(reaper.sweep().await.unwrap(), vec![stale]);
        assert_eq!(repo.order(stale).unwrap().status, OrderStatus::Finished);
        assert_eq!(repo.order(fresh).unwrap().status, OrderStatus::Processing);
        assert_eq!(repo.order(waiting).unwrap().status, OrderStatus::Waiting);
        assert!(reaper.sweep().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn closer_stops_projects_without_checked_in_seats() {
        let repo = Arc::new(InMemoryRepository::new());
        repo.insert_project(project(1, true));
        repo.insert_project(project(2, true));
        repo.insert_project(project(3, false));
        let seats = Arc::new(SeatStateStore::new(
            Arc::new(InMemoryKvStore::new()),
            Duration::from_secs(60),
        ));
        seats
            .update(10, |cur| {
                let mut next = cur.clone();
                next.checked_in = true;
                next.projects = vec![1];
                Some(next)
            })
            .await
            .unwrap();
        seats
            .update(11, |cur| {
                let mut next = cur.clone();
                next.projects = vec![2];
                Some(next)
            })
            .await
            .unwrap();

        let closer = ProjectCloser::new(Arc::clone(&repo), seats);
        assert_eq!(closer.sweep().await.unwrap(), vec![2]);
        assert!(repo.project(1).unwrap().running);
        assert!(!repo.project(2).unwrap().running);
        assert!(!repo.project(3).unwrap().running);
    }

    #[tokio::test]
    async fn stats_sum_todays_completed_seat_calls() {
        let repo = Arc::new(InMemoryRepository::new());
        let order_id = repo.add_waiting_order(1, "1");
        let order = repo.order(order_id).unwrap();
        let now = now_ms();

        let done = |seat: Option<SeatId>, phase: CallPhase, created: u128, talk: u32| {
            let mut call = Call::for_order(&order, created);
            call.seat_id = seat;
            call.phase = phase;
            call.durations.seat_call = talk;
            repo.insert_call(call);
        };
        done(Some(5), CallPhase::Done, now, 30);
        done(Some(5), CallPhase::Done, now, 45);
        done(Some(6), CallPhase::Done, now, 10);
        done(Some(6), CallPhase::AwaitingLeg2, now, 99);
        done(None, CallPhase::Done, now, 99);
        done(Some(5), CallPhase::Done, day_start_ms(now) - 1, 99);

        let stats = StatAggregator::new(Arc::clone(&repo));
        assert_eq!(stats.get(5), SeatStats::default());
        assert_eq!(stats.refresh().await.unwrap(), 2);
        assert_eq!(
            stats.get(5),
            SeatStats {
                calls: 2,
                talk_secs: 75
            }
        );
        assert_eq!(
            stats.get(6),
            SeatStats {
                calls: 1,
                talk_secs: 10
            }
        );
        assert_eq!(stats.get(7), SeatStats::default());
        assert_eq!(stats.all().len(), 2);
    }
}
