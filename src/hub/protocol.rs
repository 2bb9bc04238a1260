//! Seat connection wire protocol.
//!
//! Every frame in both directions is an envelope `{"event": "<name>", "data": {...}}`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::model::{ProjectId, SeatState};
use crate::core::EngineError;

/// Frames sent by an agent client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientFrame {
    /// Sign in or out of the seat.
    #[serde(rename = "checkinChanged", alias = "checkin-changed")]
    CheckinChanged(CheckinChanged),
    /// Become ready or not ready for the listed projects.
    #[serde(rename = "readinessChanged", alias = "readiness-changed")]
    ReadinessChanged(ReadinessChanged),
}

/// Payload of [`ClientFrame::CheckinChanged`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckinChanged {
    /// New check-in flag.
    pub checkin: bool,
}

/// Payload of [`ClientFrame::ReadinessChanged`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReadinessChanged {
    /// New ready flag.
    pub ready: bool,
    /// Projects the operator will serve.
    #[serde(default)]
    pub projects: Vec<ProjectId>,
}

/// Frames sent to agent clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerFrame {
    /// Full seat state after a write.
    StateChanged(SeatState),
    /// The seat was locked for a call or released.
    LockedChanged(LockNotice),
    /// A client request was rejected.
    Error(ErrorNotice),
}

/// Payload of [`ServerFrame::LockedChanged`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockNotice {
    /// Whether the seat is now locked.
    pub locked: bool,
    /// Call bridging through the seat.
    pub call_id: Option<String>,
}

/// Payload of [`ServerFrame::Error`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    /// Human-readable reason.
    pub message: String,
}

impl ServerFrame {
    /// Error frame with `message`.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorNotice {
            message: message.into(),
        })
    }

    /// Serialize once for fan-out to many connections.
    pub fn encode(&self) -> Result<Arc<String>, EngineError> {
        Ok(Arc::new(serde_json::to_string(self)?))
    }
}

impl ClientFrame {
    /// Decode an inbound text frame.
    pub fn decode(text: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_client_frames() {
        assert_eq!(
            ClientFrame::decode(r#"{"event":"checkinChanged","data":{"checkin":true}}"#).unwrap(),
            ClientFrame::CheckinChanged(CheckinChanged { checkin: true })
        );
        assert_eq!(
            ClientFrame::decode(
                r#"{"event":"readiness-changed","data":{"ready":true,"projects":[3,4]}}"#
            )
            .unwrap(),
            ClientFrame::ReadinessChanged(ReadinessChanged {
                ready: true,
                projects: vec![3, 4]
            })
        );
        assert!(ClientFrame::decode(r#"{"event":"dance","data":{}}"#).is_err());
    }

    #[test]
    fn server_frames_use_event_envelope() {
        let state = SeatState {
            seat_id: 9,
            checked_in: true,
            ..SeatState::default()
        };
        let value = serde_json::to_value(ServerFrame::StateChanged(state)).unwrap();
        assert_eq!(value["event"], "stateChanged");
        assert_eq!(value["data"]["seatId"], 9);
        assert_eq!(value["data"]["checkedIn"], true);

        let value = serde_json::to_value(ServerFrame::LockedChanged(LockNotice {
            locked: true,
            call_id: Some("1-a".into()),
        }))
        .unwrap();
        assert_eq!(
            value,
            json!({"event": "lockedChanged", "data": {"locked": true, "callId": "1-a"}})
        );

        let value = serde_json::to_value(ServerFrame::error("nope")).unwrap();
        assert_eq!(value, json!({"event": "error", "data": {"message": "nope"}}));
    }
}
