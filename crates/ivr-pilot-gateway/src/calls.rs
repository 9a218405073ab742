//! Per-call lifecycle: session creation, transcript processing, teardown.
//!
//! Each call gets one task that owns the transcript receiver and is the only
//! writer of its session. Transcripts are applied in arrival order and a
//! digit send finishes before the next transcript is considered, so at most
//! one call-control request is in flight per call.

use std::sync::Arc;

use tracing::{debug, info, warn};

use ivr_pilot_core::config::SendFailurePolicy;
use ivr_pilot_core::error::RegistryError;
use ivr_pilot_core::flow::FlowDefinition;
use ivr_pilot_core::machine::{CallStateMachine, SideEffect, Transition};
use ivr_pilot_core::session::Outcome;
use ivr_pilot_media::{TranscriptReceiver, TranscriptionBridge};

use crate::effector::CallControl;
use crate::metrics;
use crate::registry::{CallEntry, SessionRegistry};

pub struct CallRuntime {
    machine: CallStateMachine,
    registry: Arc<SessionRegistry>,
    bridge: Arc<dyn TranscriptionBridge>,
    control: Arc<dyn CallControl>,
    on_send_failure: SendFailurePolicy,
}

impl CallRuntime {
    pub fn new(
        flow: Arc<FlowDefinition>,
        registry: Arc<SessionRegistry>,
        bridge: Arc<dyn TranscriptionBridge>,
        control: Arc<dyn CallControl>,
        on_send_failure: SendFailurePolicy,
    ) -> Self {
        Self {
            machine: CallStateMachine::new(flow),
            registry,
            bridge,
            control,
            on_send_failure,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn flow(&self) -> &FlowDefinition {
        self.machine.flow()
    }

    /// Create the session for a `start` event and open its transcription.
    pub async fn start_call(
        &self,
        call_id: &str,
        stream_sid: Option<&str>,
    ) -> Result<Arc<CallEntry>, RegistryError> {
        if self.registry.contains(call_id).await {
            return Err(RegistryError::Duplicate(call_id.to_string()));
        }

        let mut session = self.machine.new_session(call_id);
        if let Some(sid) = stream_sid {
            session = session.with_stream_sid(sid);
        }

        let (handle, transcripts) = self.bridge.open(call_id);
        // A racing duplicate drops the fresh handle, which closes it.
        let entry = self.registry.create(CallEntry::new(session, handle)).await?;

        metrics::record_call_started();
        info!(%call_id, stream_sid = stream_sid.unwrap_or("-"), step = %self.machine.flow().initial().id, "Call started");

        tokio::spawn(drive_call(
            entry.clone(),
            transcripts,
            self.machine.clone(),
            self.control.clone(),
            self.on_send_failure,
        ));

        Ok(entry)
    }

    /// Tear down a call: close its transcription, then forget the session.
    /// Unknown ids are ignored.
    pub async fn stop_call(&self, call_id: &str) -> bool {
        let Some(entry) = self.registry.get(call_id).await else {
            debug!(%call_id, "Stop for unknown call");
            return false;
        };

        entry.close();
        self.registry.remove(call_id).await;
        finish(&entry).await;
        true
    }

    /// Close every remaining call. Used on shutdown.
    pub async fn close_all(&self) -> usize {
        let entries = self.registry.drain().await;
        for entry in &entries {
            entry.close();
            finish(entry).await;
        }
        entries.len()
    }
}

async fn finish(entry: &CallEntry) {
    let session = entry.session().await;
    let succeeded = session.outcome == Outcome::Succeeded;
    metrics::record_call_ended(succeeded);
    info!(
        call_id = %entry.call_id(),
        step = %session.current_step,
        outcome = ?session.outcome,
        matches = session.matches.len(),
        "Call ended"
    );
}

async fn drive_call(
    entry: Arc<CallEntry>,
    mut transcripts: TranscriptReceiver,
    machine: CallStateMachine,
    control: Arc<dyn CallControl>,
    on_send_failure: SendFailurePolicy,
) {
    let call_id = entry.call_id().to_string();

    loop {
        let text = tokio::select! {
            biased;
            _ = entry.closed() => break,
            text = transcripts.recv() => match text {
                Some(text) => text,
                None => break,
            },
        };

        metrics::record_transcript();
        debug!(%call_id, transcript = %text, "Applying transcript");

        let transition = {
            let mut session = entry.session().await;
            machine.process(&mut session, &text)
        };
        metrics::record_transition(&transition);

        let SideEffect::EmitDtmf { digits, .. } = transition.effect() else {
            continue;
        };

        match control.send_digits(&call_id, digits).await {
            Ok(()) => {
                metrics::record_dtmf_send(true);
                info!(%call_id, %digits, "Digits sent");
            }
            Err(e) => {
                metrics::record_dtmf_send(false);
                warn!(%call_id, %digits, error = %e, "Failed to send digits");
                // A torn-down call keeps the step it ended on.
                if on_send_failure == SendFailurePolicy::Rewind && !entry.is_closed() {
                    if let Transition::Advanced { from, to, .. } = &transition {
                        if entry.session().await.rewind(from, to) {
                            info!(%call_id, step = %from, "Rewound after failed send");
                        }
                    }
                }
            }
        }
    }

    debug!(%call_id, "Transcript processing stopped");
}
