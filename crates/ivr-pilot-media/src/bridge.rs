//! Transcription bridge: one handle per call, audio in, transcript text out.
//!
//! [`channel`] wires a [`TranscriptionHandle`] (held by the call session) to a
//! [`BridgeEndpoint`] (driven by the provider connection task). Audio frames
//! queue in order while the connection is being established and are dropped
//! once the handle is in a terminal state.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeState {
    Connecting,
    Open,
    Error,
    Closed,
}

impl BridgeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Error | Self::Closed)
    }
}

/// Lower-cased, non-empty transcript text in provider order.
pub type TranscriptReceiver = mpsc::UnboundedReceiver<String>;

/// Opens one transcription connection per call.
pub trait TranscriptionBridge: Send + Sync + 'static {
    /// Start connecting for `call_id`. Never fails: connection errors leave
    /// the handle in [`BridgeState::Error`] and close the receiver.
    fn open(&self, call_id: &str) -> (TranscriptionHandle, TranscriptReceiver);
}

/// Session-side end of a transcription connection.
pub struct TranscriptionHandle {
    call_id: String,
    audio_tx: mpsc::UnboundedSender<Vec<u8>>,
    state: Arc<watch::Sender<BridgeState>>,
    cancel: CancellationToken,
}

/// Provider-side end of a transcription connection.
pub struct BridgeEndpoint {
    pub call_id: String,
    pub audio_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    pub cancel: CancellationToken,
    transcript_tx: mpsc::UnboundedSender<String>,
    state: Arc<watch::Sender<BridgeState>>,
}

/// Create a connected handle/endpoint pair in the `Connecting` state.
pub fn channel(call_id: &str) -> (TranscriptionHandle, BridgeEndpoint, TranscriptReceiver) {
    let (audio_tx, audio_rx) = mpsc::unbounded_channel();
    let (transcript_tx, transcript_rx) = mpsc::unbounded_channel();
    let (state_tx, _) = watch::channel(BridgeState::Connecting);
    let state = Arc::new(state_tx);
    let cancel = CancellationToken::new();

    let handle = TranscriptionHandle {
        call_id: call_id.to_string(),
        audio_tx,
        state: state.clone(),
        cancel: cancel.clone(),
    };
    let endpoint = BridgeEndpoint {
        call_id: call_id.to_string(),
        audio_rx,
        cancel,
        transcript_tx,
        state,
    };

    (handle, endpoint, transcript_rx)
}

/// Move to `next` unless already terminal. Returns whether the state changed.
fn transition(state: &watch::Sender<BridgeState>, next: BridgeState) -> bool {
    state.send_if_modified(|current| {
        if current.is_terminal() || *current == next {
            false
        } else {
            *current = next;
            true
        }
    })
}

impl TranscriptionHandle {
    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn state(&self) -> BridgeState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<BridgeState> {
        self.state.subscribe()
    }

    /// Queue one raw audio frame. No-op once the handle is closed or errored.
    pub fn forward_audio(&self, frame: Vec<u8>) -> bool {
        if self.state().is_terminal() {
            return false;
        }
        self.audio_tx.send(frame).is_ok()
    }

    /// Release the connection. Safe to call any number of times.
    pub fn close(&self) {
        if transition(&self.state, BridgeState::Closed) {
            debug!(call_id = %self.call_id, "Transcription handle closed");
        }
        self.cancel.cancel();
    }
}

impl Drop for TranscriptionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl BridgeEndpoint {
    pub fn state(&self) -> BridgeState {
        *self.state.borrow()
    }

    /// `Connecting` → `Open`. Fails if the handle was closed meanwhile.
    pub fn mark_open(&self) -> bool {
        transition(&self.state, BridgeState::Open)
    }

    pub fn mark_error(&self) {
        transition(&self.state, BridgeState::Error);
    }

    pub fn mark_closed(&self) {
        transition(&self.state, BridgeState::Closed);
    }

    /// Hand one transcript to the session. Dropped when empty or when the
    /// handle is no longer live.
    pub fn deliver(&self, text: String) -> bool {
        if text.is_empty() || self.state().is_terminal() {
            return false;
        }
        self.transcript_tx.send(text).is_ok()
    }
}
