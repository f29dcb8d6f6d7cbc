use std::fmt;

use serde::{Deserialize, Serialize};

/// The six states of the dispute-resolution state machine.
///
/// Each dispute flows through:
/// CLASSIFY → GATHER_EVIDENCE → VALIDATE → {SUBMIT | ESCALATE} → {MONITOR | ESCALATE}
///
/// `ESCALATE` and `MONITOR` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Classify,
    GatherEvidence,
    Validate,
    Submit,
    Escalate,
    Monitor,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Classify => write!(f, "CLASSIFY"),
            Phase::GatherEvidence => write!(f, "GATHER_EVIDENCE"),
            Phase::Validate => write!(f, "VALIDATE"),
            Phase::Submit => write!(f, "SUBMIT"),
            Phase::Escalate => write!(f, "ESCALATE"),
            Phase::Monitor => write!(f, "MONITOR"),
        }
    }
}

impl Phase {
    /// Static successor table. The conditional branches out of `VALIDATE` and
    /// `SUBMIT` are resolved dynamically by the flow definition; this table
    /// carries the default (happy-path) edge.
    pub fn successor(&self) -> Option<Phase> {
        match self {
            Phase::Classify => Some(Phase::GatherEvidence),
            Phase::GatherEvidence => Some(Phase::Validate),
            Phase::Validate => Some(Phase::Submit),
            Phase::Submit => Some(Phase::Monitor),
            Phase::Escalate | Phase::Monitor => None,
        }
    }

    /// True for the states with no outgoing edge.
    pub fn is_terminal(&self) -> bool {
        self.successor().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_display() {
        assert_eq!(Phase::Classify.to_string(), "CLASSIFY");
        assert_eq!(Phase::GatherEvidence.to_string(), "GATHER_EVIDENCE");
        assert_eq!(Phase::Validate.to_string(), "VALIDATE");
        assert_eq!(Phase::Submit.to_string(), "SUBMIT");
        assert_eq!(Phase::Escalate.to_string(), "ESCALATE");
        assert_eq!(Phase::Monitor.to_string(), "MONITOR");
    }

    #[test]
    fn successor_table_is_linear_until_the_branches() {
        assert_eq!(Phase::Classify.successor(), Some(Phase::GatherEvidence));
        assert_eq!(Phase::GatherEvidence.successor(), Some(Phase::Validate));
        assert_eq!(Phase::Validate.successor(), Some(Phase::Submit));
        assert_eq!(Phase::Submit.successor(), Some(Phase::Monitor));
    }

    #[test]
    fn escalate_and_monitor_are_terminal() {
        assert!(Phase::Escalate.is_terminal());
        assert!(Phase::Monitor.is_terminal());
        assert!(!Phase::Validate.is_terminal());
    }

    #[test]
    fn serde_uses_screaming_snake_case() {
        let json = serde_json::to_string(&Phase::GatherEvidence).unwrap();
        assert_eq!(json, r#""GATHER_EVIDENCE""#);
        let parsed: Phase = serde_json::from_str(r#""ESCALATE""#).unwrap();
        assert_eq!(parsed, Phase::Escalate);
    }
}
