//! Call-completion events reported by the switch.

use serde::{Deserialize, Serialize};

use crate::core::EngineError;

/// One completed leg as pushed onto the feedback queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdrEvent {
    /// Switch id of the reported leg.
    pub uuid: String,
    /// Id of the leg this one was bridged to; empty for an unbridged leg.
    #[serde(default)]
    pub bridge_uuid: Option<String>,
    /// Switch account.
    #[serde(default)]
    pub account: String,
    /// Absolute recording path on the switch.
    #[serde(default)]
    pub record_filename: String,
    /// Telephony hangup cause.
    #[serde(default)]
    pub hangup_cause: String,
    /// Result code from the switch's tone/announcement detector.
    #[serde(default)]
    pub da2_result: String,
    /// JSON-encoded [`CdrDetails`].
    #[serde(default)]
    pub details: String,
}

/// Decoded `details` payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CdrDetails {
    /// Channel variables.
    #[serde(default)]
    pub variables: CdrVariables,
    /// Call-flow segments, most recent first.
    #[serde(default)]
    pub callflow: Vec<CallFlow>,
}

/// Channel variables the engine reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CdrVariables {
    /// Number that was dialed.
    #[serde(default)]
    pub cti_dial_number: String,
    /// Origin of the call.
    #[serde(default)]
    pub call_source: String,
    /// Line the leg went out on.
    #[serde(default)]
    pub cti_line_name: String,
    /// Line group of that line.
    #[serde(default)]
    pub cti_line_group_name: String,
}

/// One call-flow segment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallFlow {
    /// Raw caller profile, kept opaque.
    #[serde(default)]
    pub caller_profile: serde_json::Value,
    /// Segment timestamps.
    #[serde(default)]
    pub times: FlowTimes,
}

/// String-encoded microsecond timestamps of a segment; `"0"` means unset.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlowTimes {
    /// Channel creation.
    #[serde(default)]
    pub created_time: String,
    /// Answer.
    #[serde(default)]
    pub answered_time: String,
    /// Hangup.
    #[serde(default)]
    pub hangup_time: String,
}

/// Created/answered/hangup instants of a leg, microseconds since epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LegTimes {
    /// Earliest channel creation.
    pub created: Option<i64>,
    /// Earliest answer.
    pub answered: Option<i64>,
    /// Latest hangup.
    pub hangup: Option<i64>,
}

impl CdrEvent {
    /// Decode an event from its queue payload.
    pub fn from_json(raw: &str) -> Result<Self, EngineError> {
        let event: Self = serde_json::from_str(raw)?;
        if event.uuid.is_empty() {
            return Err(EngineError::Malformed("cdr event without uuid".into()));
        }
        Ok(event)
    }

    /// Bridge id, treating an empty string as absent.
    pub fn bridge(&self) -> Option<&str> {
        self.bridge_uuid.as_deref().filter(|b| !b.is_empty())
    }

    /// Decode the nested details payload. An empty payload decodes to defaults.
    pub fn details(&self) -> Result<CdrDetails, EngineError> {
        if self.details.trim().is_empty() {
            return Ok(CdrDetails::default());
        }
        Ok(serde_json::from_str(&self.details)?)
    }

    /// Recording path relative to the recording root: the last two path segments.
    pub fn audio_path(&self) -> Option<String> {
        let segments: Vec<&str> = self
            .record_filename
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();
        match segments.as_slice() {
            [] => None,
            [only] => Some((*only).to_string()),
            [.., dir, file] => Some(format!("{dir}/{file}")),
        }
    }
}

impl CdrDetails {
    /// Collapse all call-flow segments into one set of leg instants.
    pub fn leg_times(&self) -> LegTimes {
        let mut times = LegTimes::default();
        for flow in &self.callflow {
            let t = &flow.times;
            times.created = earliest(times.created, parse_micros(&t.created_time));
            times.answered = earliest(times.answered, parse_micros(&t.answered_time));
            times.hangup = latest(times.hangup, parse_micros(&t.hangup_time));
        }
        times
    }
}

fn parse_micros(raw: &str) -> Option<i64> {
    raw.trim().parse::<i64>().ok().filter(|v| *v > 0)
}

fn earliest(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn latest(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}
