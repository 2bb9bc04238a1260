//! Outcome labels assigned to the customer leg from the switch's result code.

use serde::{Deserialize, Serialize};

/// Label attached to a finished call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeLabel {
    /// Customer answered.
    Answered,
    /// Line busy.
    Busy,
    /// Handset switched off.
    PoweredOff,
    /// Number does not exist.
    VacantNumber,
    /// Number suspended by the carrier.
    Suspended,
    /// Rang out without an answer.
    NoAnswer,
    /// Customer rejected the call.
    Rejected,
    /// Out of coverage or otherwise unreachable.
    Unreachable,
    /// Carrier rejected the call as suspected spam.
    Intercepted,
    /// Not answered, reason unknown.
    OtherUnreached,
}

/// Switch result codes and the label each maps to.
const RESULT_CODES: &[(&str, OutcomeLabel)] = &[
    ("busy now", OutcomeLabel::Busy),
    ("busy", OutcomeLabel::Busy),
    ("power off", OutcomeLabel::PoweredOff),
    ("not exist", OutcomeLabel::VacantNumber),
    ("vacant", OutcomeLabel::VacantNumber),
    ("out of service", OutcomeLabel::Suspended),
    ("suspended", OutcomeLabel::Suspended),
    ("no answer", OutcomeLabel::NoAnswer),
    ("rejected", OutcomeLabel::Rejected),
    ("unreachable", OutcomeLabel::Unreachable),
    ("not reachable", OutcomeLabel::Unreachable),
    ("intercepted", OutcomeLabel::Intercepted),
];

impl OutcomeLabel {
    /// Display name shown in the console.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Answered => "已接通",
            Self::Busy => "占线",
            Self::PoweredOff => "关机",
            Self::VacantNumber => "空号",
            Self::Suspended => "停机",
            Self::NoAnswer => "无人接听",
            Self::Rejected => "拒接",
            Self::Unreachable => "无法接通",
            Self::Intercepted => "呼叫拦截",
            Self::OtherUnreached => "其他未接通",
        }
    }

    /// Classify a customer leg. A known result code wins; otherwise the answer timestamp
    /// decides between answered and other-unreached.
    pub fn classify(result_code: &str, answered: bool) -> Self {
        let code = result_code.trim().to_ascii_lowercase();
        RESULT_CODES
            .iter()
            .find(|(known, _)| *known == code)
            .map_or(
                if answered {
                    Self::Answered
                } else {
                    Self::OtherUnreached
                },
                |(_, label)| *label,
            )
    }
}
