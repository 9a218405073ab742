//! Media stream WebSocket: one connection per bridged call.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::StreamExt;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use ivr_pilot_core::protocol::MediaStreamEvent;

use crate::metrics;
use crate::registry::CallEntry;
use crate::state::GatewayState;

/// Handle a new media stream connection.
pub async fn handle_media_connection(state: Arc<GatewayState>, mut ws: WebSocket) {
    let conn_id = Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, "New media stream connection");

    let mut call: Option<Arc<CallEntry>> = None;
    let mut dropped_frames: u64 = 0;

    while let Some(msg_result) = ws.next().await {
        let text = match msg_result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => {
                debug!(conn_id = %conn_id, "Provider closed media stream");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                error!(conn_id = %conn_id, %e, "Media stream error");
                break;
            }
        };

        let event = match MediaStreamEvent::parse(text.as_str()) {
            Ok(event) => event,
            Err(e) => {
                warn!(conn_id = %conn_id, %e, "Malformed media stream event");
                metrics::record_protocol_violation("malformed_event");
                continue;
            }
        };

        match event {
            MediaStreamEvent::Connected { protocol } => {
                debug!(conn_id = %conn_id, ?protocol, "Media stream connected");
            }
            MediaStreamEvent::Start { start, .. } => {
                if let Some(active) = &call {
                    warn!(conn_id = %conn_id, call_id = %active.call_id(), "Second start on one stream");
                    metrics::record_protocol_violation("repeated_start");
                    continue;
                }
                match state
                    .runtime
                    .start_call(&start.call_sid, Some(&start.stream_sid))
                    .await
                {
                    Ok(entry) => call = Some(entry),
                    Err(e) => {
                        warn!(conn_id = %conn_id, %e, "Ignoring start event");
                        metrics::record_protocol_violation("duplicate_start");
                    }
                }
            }
            MediaStreamEvent::Media { media, .. } => {
                let Some(active) = &call else {
                    trace!(conn_id = %conn_id, "Media before start");
                    metrics::record_protocol_violation("media_before_start");
                    continue;
                };
                match BASE64.decode(media.payload.as_bytes()) {
                    Ok(frame) => {
                        if !active.forward_audio(frame) {
                            dropped_frames += 1;
                        }
                    }
                    Err(e) => {
                        warn!(conn_id = %conn_id, call_id = %active.call_id(), %e, "Undecodable audio payload");
                        metrics::record_protocol_violation("bad_payload");
                    }
                }
            }
            MediaStreamEvent::Stop { .. } => {
                debug!(conn_id = %conn_id, "Media stream stopped");
                break;
            }
            MediaStreamEvent::Other => {}
        }
    }

    if let Some(active) = call.take() {
        if dropped_frames > 0 {
            debug!(call_id = %active.call_id(), dropped_frames, "Audio dropped without live transcription");
        }
        state.runtime.stop_call(active.call_id()).await;
    }
    info!(conn_id = %conn_id, "Media stream connection closed");
}
