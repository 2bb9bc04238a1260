//! Call-flow timestamps and the durations derived from them.
//!
//! Durations are never stored independently of their timestamps: every write recomputes all
//! six from [`CallTimes`] through [`CallDurations::from_times`].

use serde::{Deserialize, Serialize};

const MICROS_PER_SEC: i64 = 1_000_000;

/// The six call-flow timestamps, microseconds since epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallTimes {
    /// Switch started dialing the customer.
    pub dial_up_customer: Option<i64>,
    /// Customer picked up.
    pub customer_answer: Option<i64>,
    /// Switch started dialing the seat.
    pub dial_up_seat: Option<i64>,
    /// Seat picked up.
    pub seat_answer: Option<i64>,
    /// Robot handed the customer over to a seat.
    pub switch_to_seat: Option<i64>,
    /// Last leg hung up.
    pub hangup: Option<i64>,
}

impl CallTimes {
    /// Overlay `newer` on `self`: fields present in `newer` win.
    #[must_use]
    pub fn merged(&self, newer: &Self) -> Self {
        Self {
            dial_up_customer: newer.dial_up_customer.or(self.dial_up_customer),
            customer_answer: newer.customer_answer.or(self.customer_answer),
            dial_up_seat: newer.dial_up_seat.or(self.dial_up_seat),
            seat_answer: newer.seat_answer.or(self.seat_answer),
            switch_to_seat: newer.switch_to_seat.or(self.switch_to_seat),
            hangup: newer.hangup.or(self.hangup),
        }
    }
}

/// Whole-second durations derived from [`CallTimes`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallDurations {
    /// Customer ringing time.
    pub customer_ringing: u32,
    /// Seat ringing time.
    pub seat_ringing: u32,
    /// Time the robot talked before a seat answered.
    pub ai_call: u32,
    /// Time the seat talked.
    pub seat_call: u32,
    /// Time between handover and seat pickup.
    pub switching: u32,
    /// Time from customer pickup to hangup.
    pub total_call: u32,
}

impl CallDurations {
    /// Recompute every duration from `t`. Missing operands yield 0.
    pub fn from_times(t: &CallTimes) -> Self {
        Self {
            customer_ringing: answered_or_hangup(t.dial_up_customer, t.customer_answer, t.hangup),
            seat_ringing: answered_or_hangup(t.dial_up_seat, t.seat_answer, t.hangup),
            ai_call: answered_or_hangup(t.customer_answer, t.seat_answer, t.hangup),
            seat_call: seconds_between(t.seat_answer, t.hangup),
            switching: answered_or_hangup(t.switch_to_seat, t.seat_answer, t.hangup),
            total_call: seconds_between(t.customer_answer, t.hangup),
        }
    }
}

/// `end - start` when the answer happened, otherwise `hangup - start`.
fn answered_or_hangup(start: Option<i64>, answered: Option<i64>, hangup: Option<i64>) -> u32 {
    seconds_between(start, answered.or(hangup))
}

fn seconds_between(start: Option<i64>, end: Option<i64>) -> u32 {
    match (start, end) {
        (Some(s), Some(e)) if e > s => u32::try_from((e - s) / MICROS_PER_SEC).unwrap_or(u32::MAX),
        _ => 0,
    }
}
