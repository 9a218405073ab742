//! Call state machine: applies one transcript to one session.
//!
//! Only the session's current step is considered, so a single transcript
//! advances the pointer by at most one step. The caller is responsible for
//! serialising calls per session and for executing the returned side effect.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::dtmf::DtmfDigits;
use crate::flow::{FlowDefinition, StepAction, StepRef};
use crate::session::{CallSession, MatchRecord, Outcome};

/// Outbound effect requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    None,
    EmitDtmf { call_id: String, digits: DtmfDigits },
}

/// Result of applying a transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The session already reached `complete`.
    Terminal,
    /// Empty transcript or no trigger phrase matched.
    NoMatch,
    /// The session points at a step the flow does not define.
    UnknownStep(String),
    /// A phrase matched and the pointer moved.
    Advanced {
        from: String,
        to: StepRef,
        phrase: String,
        effect: SideEffect,
    },
    /// A success step matched; the session is now terminal.
    Succeeded { from: String, phrase: String },
}

impl Transition {
    pub fn effect(&self) -> &SideEffect {
        match self {
            Self::Advanced { effect, .. } => effect,
            _ => &SideEffect::None,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, Self::Advanced { .. } | Self::Succeeded { .. })
    }
}

#[derive(Debug, Clone)]
pub struct CallStateMachine {
    flow: Arc<FlowDefinition>,
}

impl CallStateMachine {
    pub fn new(flow: Arc<FlowDefinition>) -> Self {
        Self { flow }
    }

    pub fn flow(&self) -> &FlowDefinition {
        &self.flow
    }

    /// Fresh session positioned at the flow's initial step.
    pub fn new_session(&self, call_id: impl Into<String>) -> CallSession {
        CallSession::new(call_id, self.flow.initial_ref())
    }

    pub fn process(&self, session: &mut CallSession, transcript: &str) -> Transition {
        self.process_at(session, transcript, Utc::now())
    }

    pub fn process_at(
        &self,
        session: &mut CallSession,
        transcript: &str,
        now: DateTime<Utc>,
    ) -> Transition {
        if session.is_terminal() {
            return Transition::Terminal;
        }

        let step_id = match &session.current_step {
            StepRef::Step(id) => id.clone(),
            StepRef::Complete => return Transition::Terminal,
        };

        let Some(step) = self.flow.lookup(&step_id) else {
            warn!(call_id = %session.call_id, step = %step_id, "Session points at unknown step");
            return Transition::UnknownStep(step_id);
        };

        let text = transcript.trim().to_lowercase();
        if text.is_empty() {
            return Transition::NoMatch;
        }

        let Some(phrase) = step.matches(&text) else {
            debug!(call_id = %session.call_id, step = %step_id, "No trigger phrase matched");
            return Transition::NoMatch;
        };
        let phrase = phrase.to_string();

        session.matches.push(MatchRecord {
            step: step_id.clone(),
            phrase: phrase.clone(),
            transcript: text,
            at: now,
        });
        session.last_match_at = Some(now);

        match &step.action {
            StepAction::MarkSuccess => {
                session.outcome = Outcome::Succeeded;
                session.current_step = StepRef::Complete;
                session.completed_at = Some(now);
                info!(call_id = %session.call_id, step = %step_id, %phrase, "Flow succeeded");
                Transition::Succeeded {
                    from: step_id,
                    phrase,
                }
            }
            StepAction::WaitOnly => {
                session.current_step = step.next.clone();
                info!(call_id = %session.call_id, from = %step_id, to = %step.next, %phrase, "Waiting for next prompt");
                Transition::Advanced {
                    from: step_id,
                    to: step.next.clone(),
                    phrase,
                    effect: SideEffect::None,
                }
            }
            StepAction::SendDigits(digits) => {
                session.current_step = step.next.clone();
                info!(call_id = %session.call_id, from = %step_id, to = %step.next, %phrase, %digits, "Sending digits");
                Transition::Advanced {
                    from: step_id,
                    to: step.next.clone(),
                    phrase,
                    effect: SideEffect::EmitDtmf {
                        call_id: session.call_id.clone(),
                        digits: digits.clone(),
                    },
                }
            }
        }
    }
}
