//! Correlates call-completion events with in-flight calls.
//!
//! The customer leg carries the call id as its own id; the agent leg carries it as its bridge
//! id. Each event advances the call's [`CallPhase`](crate::core::model::CallPhase); events
//! that do not advance it are duplicates from redelivery and are dropped, except that a
//! repeated customer leg reruns the seat release and order finish. A delivery is acknowledged
//! only after its effect is stored, so a failure mid-way leads to redelivery instead of loss.

use std::sync::Arc;
use std::time::Duration;

use crate::core::backends::{CallRepository, KvStore, SwitchQueue};
use crate::core::cdr::CdrEvent;
use crate::core::durations::CallDurations;
use crate::core::model::{Call, CallPatch, Leg};
use crate::core::outcome::OutcomeLabel;
use crate::core::seat_store::SeatStateStore;
use crate::core::EngineError;

/// What happened to one feedback-queue message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Nothing arrived within the wait.
    Idle,
    /// The leg was applied to its call.
    Applied(Leg),
    /// The leg had already been applied.
    Duplicate,
    /// No call matches either id; dropped.
    UnknownCall,
    /// The payload could not be decoded; dropped.
    Malformed,
}

/// Consumes the switch feedback queue.
pub struct CdrReconciler<Q, R, K> {
    cdr_queue: Arc<Q>,
    repo: Arc<R>,
    seats: Arc<SeatStateStore<K>>,
    wait: Duration,
}

impl<Q, R, K> CdrReconciler<Q, R, K>
where
    Q: SwitchQueue,
    R: CallRepository,
    K: KvStore,
{
    /// Create a reconciler that waits up to `wait` for each event.
    pub const fn new(
        cdr_queue: Arc<Q>,
        repo: Arc<R>,
        seats: Arc<SeatStateStore<K>>,
        wait: Duration,
    ) -> Self {
        Self {
            cdr_queue,
            repo,
            seats,
            wait,
        }
    }

    /// Take one event off the queue and reconcile it.
    pub async fn poll_once(&self) -> Result<ReconcileOutcome, EngineError> {
        let Some(delivery) = self.cdr_queue.reserve(self.wait).await? else {
            return Ok(ReconcileOutcome::Idle);
        };
        let outcome = match CdrEvent::from_json(&delivery.payload) {
            Ok(event) => self.reconcile(&event).await?,
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable cdr");
                ReconcileOutcome::Malformed
            }
        };
        self.cdr_queue.ack(delivery.id).await?;
        Ok(outcome)
    }

    /// Apply one decoded event.
    pub async fn reconcile(&self, event: &CdrEvent) -> Result<ReconcileOutcome, EngineError> {
        let Some(call) = self.repo.find_call(&event.uuid, event.bridge()).await? else {
            tracing::warn!(uuid = %event.uuid, bridge = ?event.bridge(), "cdr for unknown call");
            return Ok(ReconcileOutcome::UnknownCall);
        };
        let details = match event.details() {
            Ok(details) => details,
            Err(e) => {
                tracing::warn!(call = %call.id, error = %e, "dropping cdr with bad details");
                return Ok(ReconcileOutcome::Malformed);
            }
        };

        let leg = if call.id == event.uuid {
            Leg::Customer
        } else {
            Leg::Agent
        };
        let Some(phase) = call.next_phase(leg) else {
            tracing::debug!(call = %call.id, ?leg, phase = ?call.phase, "duplicate cdr");
            if leg == Leg::Customer {
                self.settle(&call).await?;
            }
            return Ok(ReconcileOutcome::Duplicate);
        };

        let times = details.leg_times();
        let mut patch = CallPatch {
            phase: Some(phase),
            ..CallPatch::default()
        };
        match leg {
            Leg::Customer => {
                patch.times.dial_up_customer = times.created;
                patch.times.customer_answer = times.answered;
                patch.times.hangup = times.hangup;
                patch.audio_path = event.audio_path();
                patch.outcome = Some(OutcomeLabel::classify(
                    &event.da2_result,
                    times.answered.is_some(),
                ));
            }
            Leg::Agent => {
                patch.bridge_id = Some(event.uuid.clone());
                patch.times.dial_up_seat = times.created;
                patch.times.seat_answer = times.answered;
                patch.times.hangup = times.hangup;
                let line = details.variables.cti_line_name;
                patch.line_name = (!line.is_empty()).then_some(line);
            }
        }

        let mut merged = call.clone();
        patch.apply_to(&mut merged);
        patch.durations = Some(CallDurations::from_times(&merged.times));
        self.repo.update_call(&call.id, &patch).await?;

        if leg == Leg::Customer {
            self.settle(&call).await?;
        }
        tracing::info!(call = %call.id, ?leg, ?phase, "cdr reconciled");
        Ok(ReconcileOutcome::Applied(leg))
    }

    /// Release the call's seat and finish its order once the customer leg is stored.
    ///
    /// Both steps are idempotent and rerun when the customer leg is redelivered, so a failure
    /// here is retried through redelivery rather than lost.
    async fn settle(&self, call: &Call) -> Result<(), EngineError> {
        self.seats.unlock_seat(None, &call.id).await?;
        self.repo.finish_order(call.order_id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{CallPhase, OrderStatus};
    use crate::infra::repo::faulty::FaultyRepository;
    use crate::infra::{InMemoryKvStore, InMemoryRepository, InMemorySwitchQueue};
    use std::sync::atomic::Ordering;
    use crate::util::clock::now_ms;

    const T0: i64 = 1_700_000_000_000_000;
    const S: i64 = 1_000_000;

    struct Fixture {
        queue: Arc<InMemorySwitchQueue>,
        repo: Arc<InMemoryRepository>,
        seats: Arc<SeatStateStore<InMemoryKvStore>>,
        reconciler: CdrReconciler<InMemorySwitchQueue, InMemoryRepository, InMemoryKvStore>,
    }

    fn fixture() -> Fixture {
        let queue = Arc::new(InMemorySwitchQueue::new(Duration::from_secs(60)));
        let repo = Arc::new(InMemoryRepository::new());
        let seats = Arc::new(SeatStateStore::new(
            Arc::new(InMemoryKvStore::new()),
            Duration::from_secs(60),
        ));
        let reconciler = CdrReconciler::new(
            Arc::clone(&queue),
            Arc::clone(&repo),
            Arc::clone(&seats),
            Duration::from_millis(10),
        );
        Fixture {
            queue,
            repo,
            seats,
            reconciler,
        }
    }

    /// Insert a processing order with a call whose id is `call_id`.
    fn in_flight_call(repo: &InMemoryRepository, call_id: &str) -> Call {
        let order_id = repo.add_waiting_order(1, "13800000000");
        let mut order = repo.order(order_id).unwrap();
        order.status = OrderStatus::Processing;
        repo.insert_order(order.clone());
        let mut call = Call::for_order(&order, now_ms());
        call.id = call_id.to_string();
        repo.insert_call(call.clone());
        call
    }

    fn details(created: i64, answered: i64, hangup: i64, line: &str) -> String {
        serde_json::json!({
            "variables": {"cti_line_name": line},
            "callflow": [{"caller_profile": {}, "times": {
                "created_time": created.to_string(),
                "answered_time": answered.to_string(),
                "hangup_time": hangup.to_string()
            }}]
        })
        .to_string()
    }

    fn event(uuid: &str, bridge: &str, da2: &str, details: String) -> CdrEvent {
        CdrEvent {
            uuid: uuid.into(),
            bridge_uuid: Some(bridge.into()),
            record_filename: "/rec/20240501/call.wav".into(),
            da2_result: da2.into(),
            details,
            ..CdrEvent::default()
        }
    }

    #[tokio::test]
    async fn busy_unanswered_call_gets_busy_label() {
        let fx = fixture();
        let call = in_flight_call(&fx.repo, "X");
        let ev = event("X", "", "busy now", details(T0, 0, T0 + 5 * S, ""));

        let outcome = fx.reconciler.reconcile(&ev).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Applied(Leg::Customer));

        let stored = fx.repo.call("X").unwrap();
        assert_eq!(stored.outcome, Some(OutcomeLabel::Busy));
        assert_eq!(stored.outcome.unwrap().name(), "占线");
        assert_eq!(stored.phase, CallPhase::Done);
        assert_eq!(stored.durations.customer_ringing, 5);
        assert_eq!(stored.audio_path.as_deref(), Some("20240501/call.wav"));
        assert_eq!(
            fx.repo.order(call.order_id).unwrap().status,
            OrderStatus::Finished
        );
    }

    #[tokio::test]
    async fn two_legs_with_seat() {
        let fx = fixture();
        let call = in_flight_call(&fx.repo, "1-abc");
        fx.seats
            .update(3, |cur| {
                let mut next = cur.clone();
                next.checked_in = true;
                next.ready = true;
                Some(next)
            })
            .await
            .unwrap();
        assert!(fx.seats.lock_seat(3, "1-abc").await.unwrap());
        fx.repo.attach_seat("1-abc", 3, T0 + 20 * S).await.unwrap();

        let leg1 = event("1-abc", "", "", details(T0, T0 + 10 * S, T0 + 100 * S, ""));
        assert_eq!(
            fx.reconciler.reconcile(&leg1).await.unwrap(),
            ReconcileOutcome::Applied(Leg::Customer)
        );
        let after_leg1 = fx.repo.call("1-abc").unwrap();
        assert_eq!(after_leg1.phase, CallPhase::AwaitingLeg2);
        assert_eq!(after_leg1.outcome, Some(OutcomeLabel::Answered));
        assert!(!fx.seats.get(3).await.unwrap().locked);

        let leg2 = event(
            "agent-leg",
            "1-abc",
            "",
            details(T0 + 21 * S, T0 + 25 * S, T0 + 100 * S, "line-9"),
        );
        assert_eq!(
            fx.reconciler.reconcile(&leg2).await.unwrap(),
            ReconcileOutcome::Applied(Leg::Agent)
        );
        let done = fx.repo.call("1-abc").unwrap();
        assert_eq!(done.phase, CallPhase::Done);
        assert_eq!(done.bridge_id.as_deref(), Some("agent-leg"));
        assert_eq!(done.line_name.as_deref(), Some("line-9"));
        assert_eq!(done.durations.customer_ringing, 10);
        assert_eq!(done.durations.seat_ringing, 4);
        assert_eq!(done.durations.ai_call, 15);
        assert_eq!(done.durations.seat_call, 75);
        assert_eq!(done.durations.switching, 5);
        assert_eq!(done.durations.total_call, 90);
        assert_eq!(
            fx.repo.order(call.order_id).unwrap().status,
            OrderStatus::Finished
        );
    }

    #[tokio::test]
    async fn repeated_customer_leg_is_duplicate() {
        let fx = fixture();
        in_flight_call(&fx.repo, "D");
        let ev = event("D", "", "", details(T0, 0, T0 + S, ""));
        fx.reconciler.reconcile(&ev).await.unwrap();
        let first = fx.repo.call("D").unwrap();
        assert_eq!(
            fx.reconciler.reconcile(&ev).await.unwrap(),
            ReconcileOutcome::Duplicate
        );
        assert_eq!(fx.repo.call("D").unwrap(), first);
    }

    #[tokio::test]
    async fn unknown_and_malformed_events_are_acked_and_dropped() {
        let fx = fixture();
        let unknown = serde_json::to_string(&event("nope", "", "", String::new())).unwrap();
        fx.queue
            .push_batch(vec![unknown, "{broken".into()])
            .await
            .unwrap();

        assert_eq!(
            fx.reconciler.poll_once().await.unwrap(),
            ReconcileOutcome::UnknownCall
        );
        assert_eq!(
            fx.reconciler.poll_once().await.unwrap(),
            ReconcileOutcome::Malformed
        );
        assert_eq!(fx.queue.in_flight(), 0);
        assert_eq!(fx.queue.len().await.unwrap(), 0);
        assert_eq!(
            fx.reconciler.poll_once().await.unwrap(),
            ReconcileOutcome::Idle
        );
    }

    #[tokio::test]
    async fn poll_applies_queued_event() {
        let fx = fixture();
        in_flight_call(&fx.repo, "Q");
        let raw = serde_json::to_string(&event("Q", "", "power off", details(T0, 0, T0 + S, "")))
            .unwrap();
        fx.queue.push_batch(vec![raw]).await.unwrap();
        assert_eq!(
            fx.reconciler.poll_once().await.unwrap(),
            ReconcileOutcome::Applied(Leg::Customer)
        );
        assert_eq!(
            fx.repo.call("Q").unwrap().outcome,
            Some(OutcomeLabel::PoweredOff)
        );
        assert_eq!(fx.queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn agent_leg_after_seatless_customer_leg_is_applied() {
        let fx = fixture();
        in_flight_call(&fx.repo, "N");
        let leg1 = event("N", "", "", details(T0, T0 + 5 * S, T0 + 60 * S, ""));
        assert_eq!(
            fx.reconciler.reconcile(&leg1).await.unwrap(),
            ReconcileOutcome::Applied(Leg::Customer)
        );
        assert_eq!(fx.repo.call("N").unwrap().phase, CallPhase::Done);

        let leg2 = event(
            "agent-n",
            "N",
            "",
            details(T0 + 30 * S, T0 + 32 * S, T0 + 60 * S, "line-2"),
        );
        assert_eq!(
            fx.reconciler.reconcile(&leg2).await.unwrap(),
            ReconcileOutcome::Applied(Leg::Agent)
        );
        let stored = fx.repo.call("N").unwrap();
        assert_eq!(stored.phase, CallPhase::Done);
        assert_eq!(stored.bridge_id.as_deref(), Some("agent-n"));
        assert_eq!(stored.line_name.as_deref(), Some("line-2"));
        assert_eq!(stored.times.seat_answer, Some(T0 + 32 * S));

        assert_eq!(
            fx.reconciler.reconcile(&leg2).await.unwrap(),
            ReconcileOutcome::Duplicate
        );
    }

    #[tokio::test]
    async fn failed_order_finish_is_retried_on_redelivery() {
        let queue = Arc::new(InMemorySwitchQueue::new(Duration::from_millis(20)));
        let inner = Arc::new(InMemoryRepository::new());
        let repo = Arc::new(FaultyRepository::new(Arc::clone(&inner)));
        let seats = Arc::new(SeatStateStore::new(
            Arc::new(InMemoryKvStore::new()),
            Duration::from_secs(60),
        ));
        let reconciler = CdrReconciler::new(
            Arc::clone(&queue),
            Arc::clone(&repo),
            seats,
            Duration::from_millis(10),
        );
        let call = in_flight_call(&inner, "F");
        let raw = serde_json::to_string(&event("F", "", "", details(T0, 0, T0 + S, ""))).unwrap();
        queue.push_batch(vec![raw]).await.unwrap();
        repo.fail_finish_order.store(true, Ordering::SeqCst);

        assert!(matches!(
            reconciler.poll_once().await,
            Err(EngineError::Repository(_))
        ));
        assert_eq!(inner.call("F").unwrap().phase, CallPhase::Done);
        assert_eq!(
            inner.order(call.order_id).unwrap().status,
            OrderStatus::Processing
        );
        assert_eq!(queue.in_flight(), 1);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(
            reconciler.poll_once().await.unwrap(),
            ReconcileOutcome::Duplicate
        );
        assert_eq!(
            inner.order(call.order_id).unwrap().status,
            OrderStatus::Finished
        );
        assert_eq!(queue.in_flight(), 0);
    }
}
