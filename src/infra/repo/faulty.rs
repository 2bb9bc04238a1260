//! Repository wrapper that injects one-shot faults for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::backends::CallRepository;
use crate::core::model::{
    Call, CallPatch, DispatchBatch, Order, OrderId, OutboxEntry, Project, ProjectId, SeatId,
};
use crate::core::EngineError;
use crate::infra::InMemoryRepository;

/// Delegates to an [`InMemoryRepository`] except where a fault is armed.
pub struct FaultyRepository {
    /// Backing repository.
    pub inner: Arc<InMemoryRepository>,
    /// Next `finish_order` fails.
    pub fail_finish_order: AtomicBool,
    /// Next `find_call` returns this snapshot instead of the stored row.
    pub stale_call: Mutex<Option<Call>>,
}

impl FaultyRepository {
    /// Wrap `inner` with no fault armed.
    pub fn new(inner: Arc<InMemoryRepository>) -> Self {
        Self {
            inner,
            fail_finish_order: AtomicBool::new(false),
            stale_call: Mutex::new(None),
        }
    }
}

#[async_trait]
impl CallRepository for FaultyRepository {
    async fn count_processing(&self) -> Result<usize, EngineError> {
        self.inner.count_processing().await
    }

    async fn count_processing_by_project(
        &self,
        projects: &[ProjectId],
    ) -> Result<HashMap<ProjectId, usize>, EngineError> {
        self.inner.count_processing_by_project(projects).await
    }

    async fn projects(&self, ids: &[ProjectId]) -> Result<Vec<Project>, EngineError> {
        self.inner.projects(ids).await
    }

    async fn fetch_waiting(
        &self,
        projects: &[ProjectId],
        limit: usize,
    ) -> Result<Vec<Order>, EngineError> {
        self.inner.fetch_waiting(projects, limit).await
    }

    async fn commit_dispatch(&self, batch: DispatchBatch) -> Result<Vec<u64>, EngineError> {
        self.inner.commit_dispatch(batch).await
    }

    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxEntry>, EngineError> {
        self.inner.pending_outbox(limit).await
    }

    async fn mark_outbox_sent(&self, ids: &[u64]) -> Result<(), EngineError> {
        self.inner.mark_outbox_sent(ids).await
    }

    async fn find_call(
        &self,
        primary: &str,
        bridge: Option<&str>,
    ) -> Result<Option<Call>, EngineError> {
        if let Some(stale) = self.stale_call.lock().take() {
            return Ok(Some(stale));
        }
        self.inner.find_call(primary, bridge).await
    }

    async fn update_call(&self, call_id: &str, patch: &CallPatch) -> Result<(), EngineError> {
        self.inner.update_call(call_id, patch).await
    }

    async fn attach_seat(
        &self,
        call_id: &str,
        seat: SeatId,
        switch_to_seat: i64,
    ) -> Result<bool, EngineError> {
        self.inner.attach_seat(call_id, seat, switch_to_seat).await
    }

    async fn finish_order(&self, order_id: OrderId) -> Result<bool, EngineError> {
        if self.fail_finish_order.swap(false, Ordering::SeqCst) {
            return Err(EngineError::Repository("db down".into()));
        }
        self.inner.finish_order(order_id).await
    }

    async fn finish_stale_orders(&self, cutoff_ms: u128) -> Result<Vec<OrderId>, EngineError> {
        self.inner.finish_stale_orders(cutoff_ms).await
    }

    async fn running_projects(&self) -> Result<Vec<Project>, EngineError> {
        self.inner.running_projects().await
    }

    async fn set_project_running(&self, id: ProjectId, running: bool) -> Result<(), EngineError> {
        self.inner.set_project_running(id, running).await
    }

    async fn completed_seat_calls_since(&self, since_ms: u128) -> Result<Vec<Call>, EngineError> {
        self.inner.completed_seat_calls_since(since_ms).await
    }
}
