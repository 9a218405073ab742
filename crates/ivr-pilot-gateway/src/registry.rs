//! Session registry: every live call, keyed by call id.
//!
//! The map lock is only held to insert, look up or remove an entry. Each
//! entry carries its own session lock, so work on distinct calls never
//! contends beyond that.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio_util::sync::CancellationToken;

use ivr_pilot_core::error::RegistryError;
use ivr_pilot_core::session::CallSession;
use ivr_pilot_media::{BridgeState, TranscriptionHandle};

/// One registered call: its session plus its transcription connection.
pub struct CallEntry {
    call_id: String,
    session: Mutex<CallSession>,
    transcription: TranscriptionHandle,
    closed: CancellationToken,
}

/// Status view of one call.
#[derive(Debug, Clone, Serialize)]
pub struct CallSnapshot {
    #[serde(flatten)]
    pub session: CallSession,
    pub transcription: BridgeState,
}

impl CallEntry {
    pub fn new(session: CallSession, transcription: TranscriptionHandle) -> Self {
        Self {
            call_id: session.call_id.clone(),
            session: Mutex::new(session),
            transcription,
            closed: CancellationToken::new(),
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Exclusive access to the session. Holders must not await anything slow.
    pub async fn session(&self) -> MutexGuard<'_, CallSession> {
        self.session.lock().await
    }

    pub fn forward_audio(&self, frame: Vec<u8>) -> bool {
        self.transcription.forward_audio(frame)
    }

    pub fn transcription_state(&self) -> BridgeState {
        self.transcription.state()
    }

    /// Close the transcription handle and stop transcript processing.
    pub fn close(&self) {
        self.transcription.close();
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    pub async fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            session: self.session.lock().await.clone(),
            transcription: self.transcription_state(),
        }
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    calls: RwLock<HashMap<String, Arc<CallEntry>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new call. Fails if the call id is already present.
    pub async fn create(&self, entry: CallEntry) -> Result<Arc<CallEntry>, RegistryError> {
        let mut calls = self.calls.write().await;
        if calls.contains_key(entry.call_id()) {
            return Err(RegistryError::Duplicate(entry.call_id().to_string()));
        }
        let entry = Arc::new(entry);
        calls.insert(entry.call_id().to_string(), entry.clone());
        Ok(entry)
    }

    pub async fn get(&self, call_id: &str) -> Option<Arc<CallEntry>> {
        self.calls.read().await.get(call_id).cloned()
    }

    pub async fn contains(&self, call_id: &str) -> bool {
        self.calls.read().await.contains_key(call_id)
    }

    /// Remove a call. Removing an unknown id is a no-op.
    pub async fn remove(&self, call_id: &str) -> Option<Arc<CallEntry>> {
        self.calls.write().await.remove(call_id)
    }

    /// Remove and return every call.
    pub async fn drain(&self) -> Vec<Arc<CallEntry>> {
        self.calls.write().await.drain().map(|(_, entry)| entry).collect()
    }

    pub async fn len(&self) -> usize {
        self.calls.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.calls.read().await.is_empty()
    }

    /// Point-in-time view of all calls, oldest first.
    pub async fn snapshot(&self) -> Vec<CallSnapshot> {
        let entries: Vec<Arc<CallEntry>> = self.calls.read().await.values().cloned().collect();
        let mut snapshots = Vec::with_capacity(entries.len());
        for entry in entries {
            snapshots.push(entry.snapshot().await);
        }
        snapshots.sort_by(|a, b| {
            a.session
                .started_at
                .cmp(&b.session.started_at)
                .then_with(|| a.session.call_id.cmp(&b.session.call_id))
        });
        snapshots
    }
}
