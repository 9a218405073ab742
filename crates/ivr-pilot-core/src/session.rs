//! Call session model: per-call step pointer, outcome and match history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::flow::StepRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    #[default]
    InProgress,
    Succeeded,
}

/// A trigger phrase that moved the session forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub step: String,
    pub phrase: String,
    pub transcript: String,
    pub at: DateTime<Utc>,
}

/// Mutable state of one live call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSession {
    pub call_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_sid: Option<String>,
    pub current_step: StepRef,
    pub outcome: Outcome,
    pub started_at: DateTime<Utc>,
    pub last_match_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub matches: Vec<MatchRecord>,
}

impl CallSession {
    pub fn new(call_id: impl Into<String>, initial: StepRef) -> Self {
        Self {
            call_id: call_id.into(),
            stream_sid: None,
            current_step: initial,
            outcome: Outcome::InProgress,
            started_at: Utc::now(),
            last_match_at: None,
            completed_at: None,
            matches: Vec::new(),
        }
    }

    pub fn with_stream_sid(mut self, stream_sid: impl Into<String>) -> Self {
        self.stream_sid = Some(stream_sid.into());
        self
    }

    /// No further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        self.outcome == Outcome::Succeeded || self.current_step.is_complete()
    }

    /// Move the pointer back to `from` if it still sits at `advanced_to`.
    ///
    /// Returns whether the pointer moved. A session that has since advanced
    /// further, or finished, is left alone.
    pub fn rewind(&mut self, from: &str, advanced_to: &StepRef) -> bool {
        if self.is_terminal() || &self.current_step != advanced_to {
            return false;
        }
        self.current_step = StepRef::Step(from.to_string());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_in_progress() {
        let session = CallSession::new("CA1", StepRef::Step("step1".into())).with_stream_sid("MZ1");
        assert_eq!(session.outcome, Outcome::InProgress);
        assert_eq!(session.current_step.as_str(), "step1");
        assert_eq!(session.stream_sid.as_deref(), Some("MZ1"));
        assert!(!session.is_terminal());
        assert!(session.last_match_at.is_none());
    }

    #[test]
    fn test_rewind_only_from_expected_step() {
        let mut session = CallSession::new("CA1", StepRef::Step("step2".into()));
        assert!(!session.rewind("step1", &StepRef::Step("step3".into())));
        assert_eq!(session.current_step.as_str(), "step2");

        assert!(session.rewind("step1", &StepRef::Step("step2".into())));
        assert_eq!(session.current_step.as_str(), "step1");
    }

    #[test]
    fn test_rewind_ignored_when_terminal() {
        let mut session = CallSession::new("CA1", StepRef::Complete);
        session.outcome = Outcome::Succeeded;
        assert!(!session.rewind("step6", &StepRef::Complete));
        assert!(session.current_step.is_complete());
    }

    #[test]
    fn test_serializes_step_as_string() {
        let session = CallSession::new("CA1", StepRef::Complete);
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["current_step"], "complete");
        assert_eq!(json["outcome"], "in_progress");
        assert!(json.get("stream_sid").is_none());
    }
}
