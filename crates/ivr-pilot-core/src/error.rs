use thiserror::Error;

use crate::dtmf::DtmfError;

#[derive(Debug, Error)]
pub enum IvrError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Flow error: {0}")]
    Flow(#[from] FlowError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Transcription error: {0}")]
    Transcription(String),

    #[error("Call control error: {0}")]
    CallControl(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Load-time flow validation failures. Any of these prevents startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    #[error("flow has no steps")]
    Empty,

    #[error("duplicate step id '{0}'")]
    DuplicateStep(String),

    #[error("step id '{0}' is reserved")]
    ReservedId(String),

    #[error("step '{0}' has no trigger phrases")]
    NoPhrases(String),

    #[error("step '{0}' has an empty trigger phrase")]
    EmptyPhrase(String),

    #[error("step '{step}' points to unknown step '{next}'")]
    DanglingNext { step: String, next: String },

    #[error("step '{step}' has an invalid digit string '{digits}': {reason}")]
    InvalidDigits {
        step: String,
        digits: String,
        reason: DtmfError,
    },

    #[error("flow revisits step '{0}' before reaching complete")]
    Cycle(String),
}

/// Failure to deliver a digit sequence to a live call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallControlError {
    #[error("call control not configured: {0}")]
    NotConfigured(String),

    #[error("call control request failed: {0}")]
    Transport(String),

    #[error("call control rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("call '{0}' is already registered")]
    Duplicate(String),
}

pub type Result<T> = std::result::Result<T, IvrError>;
