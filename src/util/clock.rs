//! Wall-clock helpers.
//!
//! Order bookkeeping uses milliseconds since the Unix epoch; call-flow timestamps reported by
//! the switch are microseconds since the epoch.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds in one day.
pub const DAY_MS: u128 = 86_400_000;

/// Current time in milliseconds since the Unix epoch.
pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Current time in microseconds since the Unix epoch.
pub fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| i64::try_from(d.as_micros()).ok())
        .unwrap_or(0)
}

/// Start of the UTC day containing `ms`.
pub const fn day_start_ms(ms: u128) -> u128 {
    ms - ms % DAY_MS
}
