//! Per-tick admission control.
//!
//! The planner is a pure read phase: it looks at switch queue depth, global robot load and
//! seat-derived project capacity, and returns the waiting orders that may be dialed now.
//! Nothing is written; an error anywhere aborts the tick.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::core::backends::{CallRepository, KvStore, SwitchQueue};
use crate::core::model::{Order, Project, ProjectId, SeatState};
use crate::core::seat_store::SeatStateStore;
use crate::core::EngineError;

/// Global limits applied before per-project capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannerLimits {
    /// Maximum messages allowed to sit in the switch push queue.
    pub max_queue_len: usize,
    /// Maximum orders in processing across all projects.
    pub max_robot_concurrency: usize,
}

/// Why a tick admitted nothing, or that it admitted something.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Orders were admitted.
    Admitted,
    /// Switch queue at or over its maximum length.
    QueueFull,
    /// Robots at maximum concurrency.
    RobotsBusy,
    /// No checked-in, ready seat serves any project.
    NoSeats,
    /// Every candidate project is at capacity.
    NoCapacity,
    /// Capacity exists but nothing is waiting.
    NothingWaiting,
}

/// Result of one planning pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickPlan {
    /// Orders to dispatch, in fetch order.
    pub orders: Vec<Order>,
    /// Summary of the pass.
    pub outcome: TickOutcome,
}

impl TickPlan {
    const fn empty(outcome: TickOutcome) -> Self {
        Self {
            orders: Vec::new(),
            outcome,
        }
    }
}

/// Computes admissions from live state.
pub struct CapacityPlanner<Q, R, K> {
    push_queue: Arc<Q>,
    repo: Arc<R>,
    seats: Arc<SeatStateStore<K>>,
    limits: PlannerLimits,
}

impl<Q, R, K> CapacityPlanner<Q, R, K>
where
    Q: SwitchQueue,
    R: CallRepository,
    K: KvStore,
{
    /// Create a planner.
    pub const fn new(
        push_queue: Arc<Q>,
        repo: Arc<R>,
        seats: Arc<SeatStateStore<K>>,
        limits: PlannerLimits,
    ) -> Self {
        Self {
            push_queue,
            repo,
            seats,
            limits,
        }
    }

    /// Plan one tick.
    pub async fn plan(&self) -> Result<TickPlan, EngineError> {
        let depth = self.push_queue.len().await?;
        if depth >= self.limits.max_queue_len {
            tracing::debug!(depth, max = self.limits.max_queue_len, "push queue full");
            return Ok(TickPlan::empty(TickOutcome::QueueFull));
        }
        let mut budget = self.limits.max_queue_len - depth;

        let real_load = self.repo.count_processing().await?;
        if real_load >= self.limits.max_robot_concurrency {
            tracing::info!(
                real_load,
                max = self.limits.max_robot_concurrency,
                "robots busy"
            );
            return Ok(TickPlan::empty(TickOutcome::RobotsBusy));
        }
        budget = budget.min(self.limits.max_robot_concurrency - real_load);

        let seats: Vec<SeatState> = self
            .seats
            .all()
            .await?
            .into_iter()
            .filter(SeatState::is_available)
            .collect();
        let candidates: BTreeSet<ProjectId> = seats
            .iter()
            .flat_map(|s| s.projects.iter().copied())
            .collect();
        if candidates.is_empty() {
            tracing::debug!("no available seats");
            return Ok(TickPlan::empty(TickOutcome::NoSeats));
        }
        let candidates: Vec<ProjectId> = candidates.into_iter().collect();

        let active = self.repo.count_processing_by_project(&candidates).await?;
        let projects: HashMap<ProjectId, Project> = self
            .repo
            .projects(&candidates)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let mut capacitor = project_capacity(&seats, &projects, &active);
        if capacitor.is_empty() {
            tracing::debug!(projects = candidates.len(), "all projects at capacity");
            return Ok(TickPlan::empty(TickOutcome::NoCapacity));
        }

        let mut valid: Vec<ProjectId> = capacitor.keys().copied().collect();
        valid.sort_unstable();
        let fetched = self.repo.fetch_waiting(&valid, budget).await?;
        let orders = admit(fetched, &mut capacitor);
        if orders.is_empty() {
            return Ok(TickPlan::empty(TickOutcome::NothingWaiting));
        }
        tracing::info!(admitted = orders.len(), budget, "orders admitted");
        Ok(TickPlan {
            orders,
            outcome: TickOutcome::Admitted,
        })
    }
}

/// Remaining headroom per project, keeping only projects with headroom left.
///
/// Each available seat adds, to every project it serves, the project's busy coefficient plus
/// one when locked or its spare coefficient otherwise; processing orders are subtracted.
pub fn project_capacity(
    seats: &[SeatState],
    projects: &HashMap<ProjectId, Project>,
    active: &HashMap<ProjectId, usize>,
) -> HashMap<ProjectId, u32> {
    let mut max_load: HashMap<ProjectId, u64> = HashMap::new();
    for seat in seats.iter().filter(|s| s.is_available()) {
        for project_id in &seat.projects {
            if let Some(project) = projects.get(project_id) {
                *max_load.entry(*project_id).or_default() +=
                    u64::from(project.seat_contribution(seat.locked));
            }
        }
    }
    max_load
        .into_iter()
        .filter_map(|(project, max)| {
            let load = active.get(&project).map_or(0, |n| *n as u64);
            let left = max.saturating_sub(load);
            (left > 0).then(|| (project, u32::try_from(left).unwrap_or(u32::MAX)))
        })
        .collect()
}

/// Walk `orders` in order, admitting each while its project still has headroom.
pub fn admit(orders: Vec<Order>, capacitor: &mut HashMap<ProjectId, u32>) -> Vec<Order> {
    orders
        .into_iter()
        .filter(|order| match capacitor.get_mut(&order.project_id) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::OrderStatus;
    use crate::infra::{InMemoryKvStore, InMemoryRepository, InMemorySwitchQueue};
    use std::time::Duration;

    fn project(id: ProjectId, spare: u32, busy: u32) -> Project {
        Project {
            id,
            spare_coefficient: spare,
            busy_coefficient: busy,
            running: true,
            robot_id: None,
            seat_ids: vec![],
        }
    }

    fn seat(id: u64, projects: Vec<ProjectId>, ready: bool, locked: bool) -> SeatState {
        SeatState {
            seat_id: id,
            checked_in: true,
            ready,
            pre_ready: locked,
            locked,
            projects,
            ..SeatState::default()
        }
    }

    fn order(id: u64, project_id: ProjectId) -> Order {
        Order {
            id,
            project_id,
            phone: format!("{id}"),
            status: OrderStatus::Waiting,
            updated_at_ms: 0,
        }
    }

    #[test]
    fn capacity_sums_seat_contributions() {
        let projects = HashMap::from([(1, project(1, 2, 1)), (2, project(2, 1, 0))]);
        let seats = vec![
            seat(1, vec![1, 2], true, false),
            seat(2, vec![1], false, true),
            SeatState {
                checked_in: false,
                ready: true,
                projects: vec![1],
                ..SeatState::default()
            },
        ];
        let active = HashMap::from([(1, 1), (2, 1)]);
        let cap = project_capacity(&seats, &projects, &active);
        // Project 1: 2 (spare) + 2 (busy+1) - 1 active. Project 2: 1 - 1 = 0, dropped.
        assert_eq!(cap, HashMap::from([(1, 3)]));
    }

    #[test]
    fn admission_never_exceeds_capacitor() {
        let mut capacitor = HashMap::from([(1, 2), (2, 1)]);
        let orders = vec![order(1, 1), order(2, 2), order(3, 1), order(4, 1), order(5, 2), order(6, 3)];
        let admitted = admit(orders, &mut capacitor);
        let ids: Vec<u64> = admitted.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(capacitor, HashMap::from([(1, 0), (2, 0)]));
    }

    struct Fixture {
        queue: Arc<InMemorySwitchQueue>,
        repo: Arc<InMemoryRepository>,
        seats: Arc<SeatStateStore<InMemoryKvStore>>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                queue: Arc::new(InMemorySwitchQueue::new(Duration::from_secs(60))),
                repo: Arc::new(InMemoryRepository::new()),
                seats: Arc::new(SeatStateStore::new(
                    Arc::new(InMemoryKvStore::new()),
                    Duration::from_secs(60),
                )),
            }
        }

        fn planner(
            &self,
            max_queue_len: usize,
            max_robot_concurrency: usize,
        ) -> CapacityPlanner<InMemorySwitchQueue, InMemoryRepository, InMemoryKvStore> {
            CapacityPlanner::new(
                Arc::clone(&self.queue),
                Arc::clone(&self.repo),
                Arc::clone(&self.seats),
                PlannerLimits {
                    max_queue_len,
                    max_robot_concurrency,
                },
            )
        }

        async fn ready_seat(&self, id: u64, projects: Vec<ProjectId>) {
            self.seats
                .update(id, |cur| {
                    let mut next = cur.clone();
                    next.checked_in = true;
                    next.ready = true;
                    next.projects = projects.clone();
                    Some(next)
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn full_queue_admits_nothing() {
        let fx = Fixture::new();
        fx.repo.insert_project(project(1, 5, 0));
        fx.repo.add_waiting_order(1, "1");
        fx.ready_seat(1, vec![1]).await;
        fx.queue
            .push_batch(vec!["a".into(), "b".into()])
            .await
            .unwrap();

        let plan = fx.planner(2, 10).plan().await.unwrap();
        assert!(plan.orders.is_empty());
        assert_eq!(plan.outcome, TickOutcome::QueueFull);
    }

    #[tokio::test]
    async fn budget_is_min_of_queue_and_robot_headroom() {
        let fx = Fixture::new();
        fx.repo.insert_project(project(1, 10, 0));
        for i in 0..10 {
            fx.repo.add_waiting_order(1, format!("{i}"));
        }
        fx.ready_seat(1, vec![1]).await;

        let plan = fx.planner(5, 3).plan().await.unwrap();
        assert_eq!(plan.orders.len(), 3);
        let plan = fx.planner(2, 30).plan().await.unwrap();
        assert_eq!(plan.orders.len(), 2);
    }

    #[tokio::test]
    async fn per_project_capacity_limits_admission() {
        let fx = Fixture::new();
        fx.repo.insert_project(project(1, 1, 0));
        fx.repo.insert_project(project(2, 2, 0));
        for i in 0..4 {
            fx.repo.add_waiting_order(1, format!("a{i}"));
            fx.repo.add_waiting_order(2, format!("b{i}"));
        }
        fx.ready_seat(1, vec![1, 2]).await;

        let plan = fx.planner(100, 100).plan().await.unwrap();
        let per_project = |p| plan.orders.iter().filter(|o| o.project_id == p).count();
        assert_eq!(per_project(1), 1);
        assert_eq!(per_project(2), 2);
    }

    #[tokio::test]
    async fn no_ready_seat_means_no_admission() {
        let fx = Fixture::new();
        fx.repo.insert_project(project(1, 1, 0));
        fx.repo.add_waiting_order(1, "1");
        let plan = fx.planner(10, 10).plan().await.unwrap();
        assert_eq!(plan.outcome, TickOutcome::NoSeats);
    }

    #[tokio::test]
    async fn planning_writes_nothing() {
        let fx = Fixture::new();
        fx.repo.insert_project(project(1, 1, 0));
        let id = fx.repo.add_waiting_order(1, "1");
        fx.ready_seat(1, vec![1]).await;
        let plan = fx.planner(10, 10).plan().await.unwrap();
        assert_eq!(plan.orders.len(), 1);
        assert_eq!(fx.repo.order(id).unwrap().status, OrderStatus::Waiting);
        assert_eq!(fx.queue.len().await.unwrap(), 0);
    }
}
