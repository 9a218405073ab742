//! DTMF digit strings: tones (`0-9`, `*`, `#`) interleaved with `w` pauses.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Short inter-digit wait understood by the telephony provider (0.5s).
pub const PAUSE: char = 'w';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DtmfError {
    #[error("digit string is empty")]
    Empty,

    #[error("invalid character '{0}'")]
    InvalidChar(char),

    #[error("pause marker at start")]
    LeadingPause,

    #[error("pause marker at end")]
    TrailingPause,

    #[error("repeated pause marker at position {0}")]
    RepeatedPause(usize),
}

/// A validated digit string, safe to hand to the call control effector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DtmfDigits(String);

fn is_tone(c: char) -> bool {
    c.is_ascii_digit() || c == '*' || c == '#'
}

impl DtmfDigits {
    pub fn parse(raw: &str) -> Result<Self, DtmfError> {
        if raw.is_empty() {
            return Err(DtmfError::Empty);
        }

        let mut prev_pause = false;
        for (i, c) in raw.chars().enumerate() {
            if c == PAUSE {
                if i == 0 {
                    return Err(DtmfError::LeadingPause);
                }
                if prev_pause {
                    return Err(DtmfError::RepeatedPause(i));
                }
                prev_pause = true;
            } else if is_tone(c) {
                prev_pause = false;
            } else {
                return Err(DtmfError::InvalidChar(c));
            }
        }

        if prev_pause {
            return Err(DtmfError::TrailingPause);
        }

        Ok(Self(raw.to_string()))
    }

    /// Strip leading/trailing pauses and collapse repeated ones.
    ///
    /// Characters that are neither tones nor pauses are left in place so that
    /// `parse` still reports them.
    pub fn normalize(raw: &str) -> String {
        let mut out = String::with_capacity(raw.len());
        for c in raw.chars() {
            if c == PAUSE && (out.is_empty() || out.ends_with(PAUSE)) {
                continue;
            }
            out.push(c);
        }
        while out.ends_with(PAUSE) {
            out.pop();
        }
        out
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Tone characters only, pauses removed.
    pub fn tones(&self) -> impl Iterator<Item = char> + '_ {
        self.0.chars().filter(|c| *c != PAUSE)
    }
}

impl fmt::Display for DtmfDigits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DtmfDigits {
    type Error = DtmfError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DtmfDigits> for String {
    fn from(value: DtmfDigits) -> Self {
        value.0
    }
}
