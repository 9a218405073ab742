//! Flow definition: the ordered, named chain of IVR steps.
//!
//! A flow is loaded once from configuration and validated before the server
//! starts: every `next` must resolve, digit strings must be well formed, and
//! following `next` from any step must reach [`StepRef::Complete`] without
//! revisiting a step.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::dtmf::DtmfDigits;
use crate::error::FlowError;

/// Sentinel successor id marking the end of the flow.
pub const COMPLETE: &str = "complete";

/// Pointer into a flow: a named step, or the terminal `complete` state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StepRef {
    Step(String),
    Complete,
}

impl StepRef {
    pub fn parse(raw: &str) -> Self {
        if raw == COMPLETE {
            Self::Complete
        } else {
            Self::Step(raw.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Step(id) => id,
            Self::Complete => COMPLETE,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

impl fmt::Display for StepRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for StepRef {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<StepRef> for String {
    fn from(value: StepRef) -> Self {
        value.as_str().to_string()
    }
}

/// Step action as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionConfig {
    SendDigits { digits: String },
    WaitOnly,
    MarkSuccess,
}

/// One step as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepConfig {
    pub id: String,
    pub listen_for: Vec<String>,
    pub action: ActionConfig,
    pub next: String,
}

/// What happens when a step's trigger phrase is heard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    SendDigits(DtmfDigits),
    WaitOnly,
    MarkSuccess,
}

impl StepAction {
    pub fn label(&self) -> &'static str {
        match self {
            Self::SendDigits(_) => "send_digits",
            Self::WaitOnly => "wait_only",
            Self::MarkSuccess => "mark_success",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub id: String,
    /// Lowercase substrings, tested in declaration order.
    pub trigger_phrases: Vec<String>,
    pub action: StepAction,
    pub next: StepRef,
}

impl Step {
    /// First trigger phrase contained in `transcript`, if any.
    pub fn matches(&self, transcript: &str) -> Option<&str> {
        self.trigger_phrases
            .iter()
            .find(|phrase| transcript.contains(phrase.as_str()))
            .map(String::as_str)
    }
}

/// Validated, read-only flow.
#[derive(Debug, Clone)]
pub struct FlowDefinition {
    steps: Vec<Step>,
    index: HashMap<String, usize>,
}

impl FlowDefinition {
    /// Build and validate a flow. The first entry is the initial step.
    pub fn from_steps(configs: Vec<StepConfig>) -> Result<Self, FlowError> {
        if configs.is_empty() {
            return Err(FlowError::Empty);
        }

        let mut steps = Vec::with_capacity(configs.len());
        let mut index = HashMap::with_capacity(configs.len());

        for config in configs {
            let id = config.id.trim().to_string();
            if id.is_empty() || id == COMPLETE {
                return Err(FlowError::ReservedId(id));
            }
            if index.contains_key(&id) {
                return Err(FlowError::DuplicateStep(id));
            }
            if config.listen_for.is_empty() {
                return Err(FlowError::NoPhrases(id));
            }

            let mut trigger_phrases = Vec::with_capacity(config.listen_for.len());
            for phrase in &config.listen_for {
                let phrase = phrase.trim().to_lowercase();
                // An empty phrase would match every transcript.
                if phrase.is_empty() {
                    return Err(FlowError::EmptyPhrase(id));
                }
                trigger_phrases.push(phrase);
            }

            let action = match config.action {
                ActionConfig::SendDigits { digits } => match DtmfDigits::parse(&digits) {
                    Ok(parsed) => StepAction::SendDigits(parsed),
                    Err(reason) => {
                        return Err(FlowError::InvalidDigits {
                            step: id,
                            digits,
                            reason,
                        });
                    }
                },
                ActionConfig::WaitOnly => StepAction::WaitOnly,
                ActionConfig::MarkSuccess => StepAction::MarkSuccess,
            };

            index.insert(id.clone(), steps.len());
            steps.push(Step {
                id,
                trigger_phrases,
                action,
                next: StepRef::parse(config.next.trim()),
            });
        }

        let flow = Self { steps, index };
        flow.check_links()?;
        flow.check_acyclic()?;

        let reachable: HashSet<&str> = flow.path().into_iter().collect();
        for step in &flow.steps {
            if !reachable.contains(step.id.as_str()) {
                warn!(step = %step.id, "Step is unreachable from the initial step");
            }
        }

        Ok(flow)
    }

    fn check_links(&self) -> Result<(), FlowError> {
        for step in &self.steps {
            if let StepRef::Step(next) = &step.next {
                if !self.index.contains_key(next) {
                    return Err(FlowError::DanglingNext {
                        step: step.id.clone(),
                        next: next.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Every step must reach `complete`. Links are already known to resolve,
    /// so the only way to fail is to revisit a step.
    fn check_acyclic(&self) -> Result<(), FlowError> {
        for start in &self.steps {
            let mut seen = HashSet::new();
            let mut current = Some(start);
            while let Some(step) = current {
                if !seen.insert(step.id.as_str()) {
                    return Err(FlowError::Cycle(step.id.clone()));
                }
                current = match &step.next {
                    StepRef::Step(next) => self.lookup(next),
                    StepRef::Complete => None,
                };
            }
        }
        Ok(())
    }

    pub fn initial(&self) -> &Step {
        // Construction guarantees at least one step.
        &self.steps[0]
    }

    pub fn initial_ref(&self) -> StepRef {
        StepRef::Step(self.initial().id.clone())
    }

    pub fn lookup(&self, id: &str) -> Option<&Step> {
        self.index.get(id).map(|&i| &self.steps[i])
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step ids visited by following `next` from the initial step. A
    /// `MarkSuccess` step ends the call, so the walk stops there.
    pub fn path(&self) -> Vec<&str> {
        let mut path = Vec::new();
        let mut current = Some(self.initial());
        while let Some(step) = current {
            if path.contains(&step.id.as_str()) {
                break;
            }
            path.push(step.id.as_str());
            if step.action == StepAction::MarkSuccess {
                break;
            }
            current = match &step.next {
                StepRef::Step(next) => self.lookup(next),
                StepRef::Complete => None,
            };
        }
        path
    }
}

/// Built-in employee check-in flow, used when the config has no `flow` section.
pub fn default_steps() -> Vec<StepConfig> {
    fn step(id: &str, listen_for: &[&str], action: ActionConfig, next: &str) -> StepConfig {
        StepConfig {
            id: id.into(),
            listen_for: listen_for.iter().map(|p| p.to_string()).collect(),
            action,
            next: next.into(),
        }
    }

    vec![
        // Employee ID: 1234
        step(
            "step1",
            &["enter employee", "employee id", "vesta"],
            ActionConfig::SendDigits { digits: "1w2w3w4".into() },
            "step2",
        ),
        // Member ID: 123456
        step(
            "step2",
            &["member id", "enter a member"],
            ActionConfig::SendDigits { digits: "1w2w3w4w5w6".into() },
            "step3",
        ),
        // 1 = check-in
        step(
            "step3",
            &["clock in", "clock out", "enter 1 to clock", "enter 2 to clock"],
            ActionConfig::SendDigits { digits: "1".into() },
            "step4",
        ),
        step("step4", &["overnight", "overnight visit"], ActionConfig::WaitOnly, "step5"),
        step("step5", &["token number", "enter token"], ActionConfig::WaitOnly, "step6"),
        step("step6", &["time"], ActionConfig::MarkSuccess, COMPLETE),
    ]
}
