//! Loop bodies of the engine: push tick, completion-event pull and the sweepers.

use async_trait::async_trait;

use crate::core::backends::{CallRepository, KvStore, SwitchQueue};
use crate::core::dispatcher::OrderDispatcher;
use crate::core::planner::{CapacityPlanner, TickOutcome};
use crate::core::reconciler::{CdrReconciler, ReconcileOutcome};
use crate::core::sweepers::{OrderReaper, ProjectCloser, StatAggregator};
use crate::core::AppResult;
use crate::runtime::supervisor::{Pass, Worker};

/// Admission tick: relay leftover outbox rows, plan, then dispatch what was admitted.
pub struct PushTick<Q, R, K> {
    planner: CapacityPlanner<Q, R, K>,
    dispatcher: OrderDispatcher<Q, R>,
}

impl<Q, R, K> PushTick<Q, R, K> {
    /// Combine a planner and a dispatcher over the same queue and repository.
    pub const fn new(planner: CapacityPlanner<Q, R, K>, dispatcher: OrderDispatcher<Q, R>) -> Self {
        Self {
            planner,
            dispatcher,
        }
    }
}

#[async_trait]
impl<Q, R, K> Worker for PushTick<Q, R, K>
where
    Q: SwitchQueue,
    R: CallRepository,
    K: KvStore,
{
    fn name(&self) -> &'static str {
        "push-tick"
    }

    async fn run_once(&self) -> AppResult<Pass> {
        self.dispatcher.relay_outbox().await?;
        let plan = self.planner.plan().await?;
        if plan.outcome != TickOutcome::Admitted {
            tracing::debug!(outcome = ?plan.outcome, "nothing admitted");
            return Ok(Pass::Idle);
        }
        let report = self.dispatcher.dispatch(&plan.orders).await?;
        tracing::info!(calls = report.call_ids.len(), pushed = report.pushed, "tick dispatched");
        Ok(Pass::Worked)
    }
}

#[async_trait]
impl<Q, R, K> Worker for CdrReconciler<Q, R, K>
where
    Q: SwitchQueue,
    R: CallRepository,
    K: KvStore,
{
    fn name(&self) -> &'static str {
        "cdr-pull"
    }

    async fn run_once(&self) -> AppResult<Pass> {
        Ok(match self.poll_once().await? {
            ReconcileOutcome::Idle => Pass::Idle,
            _ => Pass::Worked,
        })
    }
}

#[async_trait]
impl<R: CallRepository> Worker for OrderReaper<R> {
    fn name(&self) -> &'static str {
        "order-reaper"
    }

    async fn run_once(&self) -> AppResult<Pass> {
        self.sweep().await?;
        Ok(Pass::Idle)
    }
}

#[async_trait]
impl<R: CallRepository, K: KvStore> Worker for ProjectCloser<R, K> {
    fn name(&self) -> &'static str {
        "project-closer"
    }

    async fn run_once(&self) -> AppResult<Pass> {
        self.sweep().await?;
        Ok(Pass::Idle)
    }
}

#[async_trait]
impl<R: CallRepository> Worker for StatAggregator<R> {
    fn name(&self) -> &'static str {
        "stat-aggregator"
    }

    async fn run_once(&self) -> AppResult<Pass> {
        self.refresh().await?;
        Ok(Pass::Idle)
    }
}
