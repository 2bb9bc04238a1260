//! In-memory switch queue with reserve/acknowledge delivery.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::core::backends::{Delivery, SwitchQueue};
use crate::core::EngineError;

struct Inner {
    next_id: u64,
    /// Messages ready for delivery, head first.
    ready: VecDeque<(u64, String)>,
    /// Reserved messages and the instant they become visible again.
    in_flight: HashMap<u64, (String, Instant)>,
}

/// FIFO queue where consumers reserve a message and acknowledge it once its effect is
/// durable. Unacknowledged messages go back to the head after the visibility timeout.
pub struct InMemorySwitchQueue {
    name: String,
    max_depth: Option<usize>,
    visibility: Duration,
    inner: Mutex<Inner>,
    notify: Notify,
}

impl InMemorySwitchQueue {
    /// Create an unbounded queue with the given visibility timeout.
    pub fn new(visibility: Duration) -> Self {
        Self::named("memory", visibility)
    }

    /// Create an unbounded queue called `name`, the key the switch shares it under.
    pub fn named(name: impl Into<String>, visibility: Duration) -> Self {
        Self {
            name: name.into(),
            max_depth: None,
            visibility,
            inner: Mutex::new(Inner {
                next_id: 1,
                ready: VecDeque::new(),
                in_flight: HashMap::new(),
            }),
            notify: Notify::new(),
        }
    }

    /// Reject pushes that would take the queue past `max_depth` ready messages.
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = Some(max_depth);
        self
    }

    /// Name used in logs and errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ready messages, head first.
    pub fn snapshot(&self) -> Vec<String> {
        let mut inner = self.inner.lock();
        self.requeue_expired(&mut inner, Instant::now());
        inner.ready.iter().map(|(_, m)| m.clone()).collect()
    }

    /// Number of reserved, unacknowledged messages.
    pub fn in_flight(&self) -> usize {
        self.inner.lock().in_flight.len()
    }

    fn requeue_expired(&self, inner: &mut Inner, now: Instant) {
        let mut expired: Vec<u64> = inner
            .in_flight
            .iter()
            .filter(|(_, (_, visible_at))| *visible_at <= now)
            .map(|(id, _)| *id)
            .collect();
        if expired.is_empty() {
            return;
        }
        // Oldest reservation ends up at the head.
        expired.sort_unstable_by(|a, b| b.cmp(a));
        for id in expired {
            if let Some((payload, _)) = inner.in_flight.remove(&id) {
                tracing::debug!(
                    queue = %self.name,
                    delivery = id,
                    "redelivering unacknowledged message"
                );
                inner.ready.push_front((id, payload));
            }
        }
    }

    fn try_reserve(&self) -> Option<Delivery> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        self.requeue_expired(&mut inner, now);
        let (id, payload) = inner.ready.pop_front()?;
        inner
            .in_flight
            .insert(id, (payload.clone(), now + self.visibility));
        Some(Delivery { id, payload })
    }
}

#[async_trait]
impl SwitchQueue for InMemorySwitchQueue {
    async fn len(&self) -> Result<usize, EngineError> {
        let mut inner = self.inner.lock();
        self.requeue_expired(&mut inner, Instant::now());
        Ok(inner.ready.len())
    }

    async fn push_batch(&self, messages: Vec<String>) -> Result<(), EngineError> {
        {
            let mut inner = self.inner.lock();
            if let Some(max) = self.max_depth {
                if inner.ready.len() + messages.len() > max {
                    return Err(EngineError::QueueFull(format!(
                        "{}: depth {} + {} exceeds {max}",
                        self.name,
                        inner.ready.len(),
                        messages.len()
                    )));
                }
            }
            for message in messages {
                let id = inner.next_id;
                inner.next_id += 1;
                inner.ready.push_back((id, message));
            }
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn reserve(&self, wait: Duration) -> Result<Option<Delivery>, EngineError> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(delivery) = self.try_reserve() {
                return Ok(Some(delivery));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let _ = tokio::time::timeout(remaining, notified).await;
        }
    }

    async fn ack(&self, delivery_id: u64) -> Result<(), EngineError> {
        self.inner.lock().in_flight.remove(&delivery_id);
        Ok(())
    }
}
