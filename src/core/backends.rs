//! Backend abstractions the engine runs against: the switch's message queues, the shared
//! key/value store holding seat state, and the relational call repository.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::model::{
    Call, CallPatch, DispatchBatch, Order, OrderId, OutboxEntry, Project, ProjectId, SeatId,
};
use crate::core::EngineError;

/// A message handed out by [`SwitchQueue::reserve`], pending acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Token passed back to [`SwitchQueue::ack`].
    pub id: u64,
    /// Raw message body.
    pub payload: String,
}

/// One of the two message queues shared with the dialing switch.
#[async_trait]
pub trait SwitchQueue: Send + Sync + 'static {
    /// Messages waiting to be consumed, excluding reserved ones.
    async fn len(&self) -> Result<usize, EngineError>;
    /// Append messages in order.
    async fn push_batch(&self, messages: Vec<String>) -> Result<(), EngineError>;
    /// Take the head message, waiting up to `wait`. The message returns to the queue unless
    /// acknowledged before the visibility timeout.
    async fn reserve(&self, wait: Duration) -> Result<Option<Delivery>, EngineError>;
    /// Permanently remove a reserved message.
    async fn ack(&self, delivery_id: u64) -> Result<(), EngineError>;
}

/// A value read from the key/value store with its write version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    /// Stored value.
    pub value: String,
    /// Monotonic version, bumped on every write. Never 0 for a present key.
    pub version: u64,
}

/// Shared low-latency key/value store.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Read a key.
    async fn get(&self, key: &str) -> Result<Option<Versioned>, EngineError>;
    /// Write `value` only if the key is still at `expected` (0 = absent). Returns whether the
    /// write happened.
    async fn compare_and_set(&self, key: &str, expected: u64, value: String)
        -> Result<bool, EngineError>;
    /// Unconditionally write a key that expires after `ttl`.
    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), EngineError>;
    /// Remove a key. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), EngineError>;
    /// All live entries whose key starts with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, EngineError>;
}

/// Relational store holding projects, orders, calls and the dispatch outbox.
#[async_trait]
pub trait CallRepository: Send + Sync + 'static {
    /// Number of orders in processing across all projects.
    async fn count_processing(&self) -> Result<usize, EngineError>;
    /// Processing orders per project, for the given projects only.
    async fn count_processing_by_project(
        &self,
        projects: &[ProjectId],
    ) -> Result<HashMap<ProjectId, usize>, EngineError>;
    /// Projects by id; unknown ids are skipped.
    async fn projects(&self, ids: &[ProjectId]) -> Result<Vec<Project>, EngineError>;
    /// Up to `limit` waiting orders of the given projects, oldest first.
    async fn fetch_waiting(
        &self,
        projects: &[ProjectId],
        limit: usize,
    ) -> Result<Vec<Order>, EngineError>;
    /// Insert calls, move orders to processing and record outbox rows atomically. Returns the
    /// outbox row ids in message order.
    async fn commit_dispatch(&self, batch: DispatchBatch) -> Result<Vec<u64>, EngineError>;
    /// Unsent outbox rows whose order is still processing, oldest first.
    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxEntry>, EngineError>;
    /// Mark outbox rows as pushed.
    async fn mark_outbox_sent(&self, ids: &[u64]) -> Result<(), EngineError>;
    /// Call whose id equals `primary` or `bridge`, or whose bridge id equals `primary`.
    async fn find_call(&self, primary: &str, bridge: Option<&str>)
        -> Result<Option<Call>, EngineError>;
    /// Apply a column-level patch to a call.
    async fn update_call(&self, call_id: &str, patch: &CallPatch) -> Result<(), EngineError>;
    /// Attach a seat to a call and stamp the handover time, once.
    async fn attach_seat(
        &self,
        call_id: &str,
        seat: SeatId,
        switch_to_seat: i64,
    ) -> Result<bool, EngineError>;
    /// Move an order to finished. Returns false when it already was.
    async fn finish_order(&self, order_id: OrderId) -> Result<bool, EngineError>;
    /// Finish every order processing since before `cutoff_ms`; returns their ids.
    async fn finish_stale_orders(&self, cutoff_ms: u128) -> Result<Vec<OrderId>, EngineError>;
    /// Projects currently marked running.
    async fn running_projects(&self) -> Result<Vec<Project>, EngineError>;
    /// Set a project's running flag.
    async fn set_project_running(&self, id: ProjectId, running: bool) -> Result<(), EngineError>;
    /// Calls in phase done with a seat attached, created at or after `since_ms`.
    async fn completed_seat_calls_since(&self, since_ms: u128) -> Result<Vec<Call>, EngineError>;
}
