//! Turns admitted orders into calls and switch push messages.
//!
//! Calls, order status and one outbox row per push message are committed in a single
//! transaction. Messages are pushed only after commit; rows whose push failed stay pending
//! and are relayed on the next tick.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::backends::{CallRepository, SwitchQueue};
use crate::core::model::{Call, DispatchBatch, Order};
use crate::core::EngineError;
use crate::util::clock::now_ms;

/// Message the switch consumes to originate a customer leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    /// Dial parameters.
    pub params: PushParams,
    /// Channel variables.
    pub variables: PushVariables,
}

/// Dial parameters of a [`PushMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushParams {
    /// Number to dial.
    pub number: String,
}

/// Channel variables of a [`PushMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushVariables {
    /// Id the switch assigns to the customer leg; equals the call id.
    pub origination_uuid: String,
    /// Codec override; empty lets the switch choose.
    pub absolute_codec_string: String,
}

impl PushMessage {
    /// Message dialing `number` as call `call_id`.
    pub fn new(number: impl Into<String>, call_id: impl Into<String>) -> Self {
        Self {
            params: PushParams {
                number: number.into(),
            },
            variables: PushVariables {
                origination_uuid: call_id.into(),
                absolute_codec_string: String::new(),
            },
        }
    }
}

/// Outcome of dispatching one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Calls created in the committed transaction.
    pub call_ids: Vec<String>,
    /// Whether the post-commit push succeeded.
    pub pushed: bool,
}

/// Commits admitted orders and pushes them to the switch.
pub struct OrderDispatcher<Q, R> {
    push_queue: Arc<Q>,
    repo: Arc<R>,
    relay_batch: usize,
}

impl<Q, R> OrderDispatcher<Q, R>
where
    Q: SwitchQueue,
    R: CallRepository,
{
    /// Create a dispatcher. `relay_batch` caps outbox rows relayed per call.
    pub const fn new(push_queue: Arc<Q>, repo: Arc<R>, relay_batch: usize) -> Self {
        Self {
            push_queue,
            repo,
            relay_batch,
        }
    }

    /// Commit `orders` to processing and push their messages.
    ///
    /// A push failure after commit is logged, not returned: the rows stay in the outbox.
    pub async fn dispatch(&self, orders: &[Order]) -> Result<DispatchReport, EngineError> {
        if orders.is_empty() {
            return Ok(DispatchReport::default());
        }
        let now = now_ms();
        let mut batch = DispatchBatch::default();
        for order in orders {
            let call = Call::for_order(order, now);
            let message = serde_json::to_string(&PushMessage::new(&order.phone, &call.id))?;
            batch.order_ids.push(order.id);
            batch.messages.push((order.id, message));
            batch.calls.push(call);
        }
        let call_ids: Vec<String> = batch.calls.iter().map(|c| c.id.clone()).collect();
        let messages: Vec<String> = batch.messages.iter().map(|(_, m)| m.clone()).collect();

        let outbox_ids = self.repo.commit_dispatch(batch).await?;
        tracing::info!(calls = call_ids.len(), "dispatch committed");

        let pushed = self.flush(messages, &outbox_ids).await;
        Ok(DispatchReport { call_ids, pushed })
    }

    /// Push outbox rows left behind by a failed post-commit push.
    pub async fn relay_outbox(&self) -> Result<usize, EngineError> {
        let pending = self.repo.pending_outbox(self.relay_batch).await?;
        if pending.is_empty() {
            return Ok(0);
        }
        let ids: Vec<u64> = pending.iter().map(|e| e.id).collect();
        let messages = pending.into_iter().map(|e| e.message).collect();
        self.push_queue.push_batch(messages).await?;
        self.repo.mark_outbox_sent(&ids).await?;
        tracing::info!(relayed = ids.len(), "outbox relayed");
        Ok(ids.len())
    }

    async fn flush(&self, messages: Vec<String>, outbox_ids: &[u64]) -> bool {
        if let Err(e) = self.push_queue.push_batch(messages).await {
            tracing::warn!(error = %e, count = outbox_ids.len(), "push after commit failed, left in outbox");
            return false;
        }
        if let Err(e) = self.repo.mark_outbox_sent(outbox_ids).await {
            // The relay will push these rows a second time.
            tracing::warn!(error = %e, "could not mark outbox rows sent");
        }
        true
    }
}
