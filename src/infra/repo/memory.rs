//! In-memory call repository with transactional dispatch.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::backends::CallRepository;
use crate::core::model::{
    Call, CallPatch, CallPhase, DispatchBatch, Order, OrderId, OrderStatus, OutboxEntry, Project,
    ProjectId, SeatId,
};
use crate::core::EngineError;
use crate::util::clock::now_ms;

#[derive(Default)]
struct Tables {
    projects: BTreeMap<ProjectId, Project>,
    orders: BTreeMap<OrderId, Order>,
    calls: HashMap<String, Call>,
    /// Outbox rows and whether each was pushed.
    outbox: BTreeMap<u64, (OutboxEntry, bool)>,
    next_order: OrderId,
    next_outbox: u64,
}

/// Repository kept entirely in memory. A single lock makes every method one transaction.
#[derive(Default)]
pub struct InMemoryRepository {
    tables: Mutex<Tables>,
}

impl InMemoryRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a project.
    pub fn insert_project(&self, project: Project) {
        self.tables.lock().projects.insert(project.id, project);
    }

    /// Create a waiting order and return its id.
    pub fn add_waiting_order(&self, project_id: ProjectId, phone: impl Into<String>) -> OrderId {
        let mut tables = self.tables.lock();
        tables.next_order += 1;
        let id = tables.next_order;
        tables.orders.insert(
            id,
            Order {
                id,
                project_id,
                phone: phone.into(),
                status: OrderStatus::Waiting,
                updated_at_ms: now_ms(),
            },
        );
        id
    }

    /// Insert or replace an order as-is.
    pub fn insert_order(&self, order: Order) {
        let mut tables = self.tables.lock();
        tables.next_order = tables.next_order.max(order.id);
        tables.orders.insert(order.id, order);
    }

    /// Read an order.
    pub fn order(&self, id: OrderId) -> Option<Order> {
        self.tables.lock().orders.get(&id).cloned()
    }

    /// Read a project.
    pub fn project(&self, id: ProjectId) -> Option<Project> {
        self.tables.lock().projects.get(&id).cloned()
    }

    /// Read a call.
    pub fn call(&self, id: &str) -> Option<Call> {
        self.tables.lock().calls.get(id).cloned()
    }

    /// Insert or replace a call as-is.
    pub fn insert_call(&self, call: Call) {
        self.tables.lock().calls.insert(call.id.clone(), call);
    }

    /// The call created for an order, if any.
    pub fn call_for_order(&self, order_id: OrderId) -> Option<Call> {
        self.tables
            .lock()
            .calls
            .values()
            .find(|c| c.order_id == order_id)
            .cloned()
    }

    /// Outbox rows not yet pushed, regardless of order status.
    pub fn unsent_outbox(&self) -> usize {
        self.tables
            .lock()
            .outbox
            .values()
            .filter(|(_, sent)| !sent)
            .count()
    }
}

#[async_trait]
impl CallRepository for InMemoryRepository {
    async fn count_processing(&self) -> Result<usize, EngineError> {
        Ok(self
            .tables
            .lock()
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Processing)
            .count())
    }

    async fn count_processing_by_project(
        &self,
        projects: &[ProjectId],
    ) -> Result<HashMap<ProjectId, usize>, EngineError> {
        let wanted: HashSet<ProjectId> = projects.iter().copied().collect();
        let tables = self.tables.lock();
        let mut counts: HashMap<ProjectId, usize> = projects.iter().map(|p| (*p, 0)).collect();
        for order in tables.orders.values() {
            if order.status == OrderStatus::Processing && wanted.contains(&order.project_id) {
                *counts.entry(order.project_id).or_default() += 1;
            }
        }
        Ok(counts)
    }

    async fn projects(&self, ids: &[ProjectId]) -> Result<Vec<Project>, EngineError> {
        let tables = self.tables.lock();
        Ok(ids
            .iter()
            .filter_map(|id| tables.projects.get(id).cloned())
            .collect())
    }

    async fn fetch_waiting(
        &self,
        projects: &[ProjectId],
        limit: usize,
    ) -> Result<Vec<Order>, EngineError> {
        let wanted: HashSet<ProjectId> = projects.iter().copied().collect();
        Ok(self
            .tables
            .lock()
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Waiting && wanted.contains(&o.project_id))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn commit_dispatch(&self, batch: DispatchBatch) -> Result<Vec<u64>, EngineError> {
        let mut tables = self.tables.lock();

        // Validate everything before touching any row.
        for id in &batch.order_ids {
            let order = tables
                .orders
                .get(id)
                .ok_or_else(|| EngineError::Repository(format!("order {id} not found")))?;
            if order.status != OrderStatus::Waiting {
                return Err(EngineError::Repository(format!(
                    "order {id} is {:?}, expected Waiting",
                    order.status
                )));
            }
        }
        if let Some(dup) = batch.calls.iter().find(|c| tables.calls.contains_key(&c.id)) {
            return Err(EngineError::Repository(format!("call {} exists", dup.id)));
        }

        let now = now_ms();
        for id in &batch.order_ids {
            if let Some(order) = tables.orders.get_mut(id) {
                order.status = order.status.advance(OrderStatus::Processing)?;
                order.updated_at_ms = now;
            }
        }
        for call in batch.calls {
            tables.calls.insert(call.id.clone(), call);
        }
        let mut outbox_ids = Vec::with_capacity(batch.messages.len());
        for (order_id, message) in batch.messages {
            tables.next_outbox += 1;
            let id = tables.next_outbox;
            outbox_ids.push(id);
            tables.outbox.insert(
                id,
                (
                    OutboxEntry {
                        id,
                        order_id,
                        message,
                    },
                    false,
                ),
            );
        }
        Ok(outbox_ids)
    }

    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxEntry>, EngineError> {
        let tables = self.tables.lock();
        Ok(tables
            .outbox
            .values()
            .filter(|(entry, sent)| {
                !sent
                    && tables
                        .orders
                        .get(&entry.order_id)
                        .is_some_and(|o| o.status == OrderStatus::Processing)
            })
            .take(limit)
            .map(|(entry, _)| entry.clone())
            .collect())
    }

    async fn mark_outbox_sent(&self, ids: &[u64]) -> Result<(), EngineError> {
        let mut tables = self.tables.lock();
        for id in ids {
            if let Some((_, sent)) = tables.outbox.get_mut(id) {
                *sent = true;
            }
        }
        Ok(())
    }

    async fn find_call(
        &self,
        primary: &str,
        bridge: Option<&str>,
    ) -> Result<Option<Call>, EngineError> {
        let tables = self.tables.lock();
        let found = tables
            .calls
            .get(primary)
            .or_else(|| bridge.and_then(|b| tables.calls.get(b)))
            .or_else(|| {
                tables
                    .calls
                    .values()
                    .find(|c| c.bridge_id.as_deref() == Some(primary))
            });
        Ok(found.cloned())
    }

    async fn update_call(&self, call_id: &str, patch: &CallPatch) -> Result<(), EngineError> {
        let mut tables = self.tables.lock();
        let call = tables
            .calls
            .get_mut(call_id)
            .ok_or_else(|| EngineError::Repository(format!("call {call_id} not found")))?;
        patch.apply_to(call);
        Ok(())
    }

    async fn attach_seat(
        &self,
        call_id: &str,
        seat: SeatId,
        switch_to_seat: i64,
    ) -> Result<bool, EngineError> {
        let mut tables = self.tables.lock();
        let Some(call) = tables.calls.get_mut(call_id) else {
            return Ok(false);
        };
        if call.seat_id.is_some() {
            return Ok(call.seat_id == Some(seat));
        }
        call.seat_id = Some(seat);
        call.times.switch_to_seat = Some(switch_to_seat);
        Ok(true)
    }

    async fn finish_order(&self, order_id: OrderId) -> Result<bool, EngineError> {
        let mut tables = self.tables.lock();
        let order = tables
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| EngineError::Repository(format!("order {order_id} not found")))?;
        if order.status == OrderStatus::Finished {
            return Ok(false);
        }
        order.status = order.status.advance(OrderStatus::Finished)?;
        order.updated_at_ms = now_ms();
        Ok(true)
    }

    async fn finish_stale_orders(&self, cutoff_ms: u128) -> Result<Vec<OrderId>, EngineError> {
        let now = now_ms();
        let mut finished = Vec::new();
        for order in self.tables.lock().orders.values_mut() {
            if order.status == OrderStatus::Processing && order.updated_at_ms < cutoff_ms {
                order.status = order.status.advance(OrderStatus::Finished)?;
                order.updated_at_ms = now;
                finished.push(order.id);
            }
        }
        Ok(finished)
    }

    async fn running_projects(&self) -> Result<Vec<Project>, EngineError> {
        Ok(self
            .tables
            .lock()
            .projects
            .values()
            .filter(|p| p.running)
            .cloned()
            .collect())
    }

    async fn set_project_running(&self, id: ProjectId, running: bool) -> Result<(), EngineError> {
        let mut tables = self.tables.lock();
        let project = tables
            .projects
            .get_mut(&id)
            .ok_or_else(|| EngineError::Repository(format!("project {id} not found")))?;
        project.running = running;
        Ok(())
    }

    async fn completed_seat_calls_since(&self, since_ms: u128) -> Result<Vec<Call>, EngineError> {
        Ok(self
            .tables
            .lock()
            .calls
            .values()
            .filter(|c| {
                c.phase == CallPhase::Done && c.seat_id.is_some() && c.created_at_ms >= since_ms
            })
            .cloned()
            .collect())
    }
}
