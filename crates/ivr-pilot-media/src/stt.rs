//! Streaming speech-to-text over Deepgram's live WebSocket API.
//!
//! Audio is forwarded untouched: the telephony stream is already 8 kHz mono
//! µ-law, and the connection declares exactly that encoding.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::time::{Instant, Interval};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use ivr_pilot_core::config::TranscriptionConfig;
use ivr_pilot_core::protocol::decode_transcript;

use crate::bridge::{self, BridgeEndpoint, TranscriptReceiver, TranscriptionBridge, TranscriptionHandle};

pub const AUDIO_ENCODING: &str = "mulaw";
pub const AUDIO_SAMPLE_RATE: u32 = 8000;
pub const AUDIO_CHANNELS: u16 = 1;

const KEEPALIVE_MESSAGE: &str = r#"{"type":"KeepAlive"}"#;
const CLOSE_STREAM_MESSAGE: &str = r#"{"type":"CloseStream"}"#;

/// Opens one Deepgram live-transcription socket per call.
#[derive(Debug, Clone)]
pub struct DeepgramBridge {
    config: TranscriptionConfig,
    api_key: Option<String>,
}

impl DeepgramBridge {
    pub fn new(config: TranscriptionConfig) -> Self {
        let api_key = config.resolve_api_key();
        Self { config, api_key }
    }

    /// Full listen URL with the audio format and model parameters.
    pub fn listen_url(&self) -> String {
        let separator = if self.config.url.contains('?') { '&' } else { '?' };
        format!(
            "{}{separator}encoding={AUDIO_ENCODING}&sample_rate={AUDIO_SAMPLE_RATE}&channels={AUDIO_CHANNELS}&model={}&language={}&punctuate={}",
            self.config.url, self.config.model, self.config.language, self.config.punctuate,
        )
    }
}

impl TranscriptionBridge for DeepgramBridge {
    fn open(&self, call_id: &str) -> (TranscriptionHandle, TranscriptReceiver) {
        let (handle, endpoint, transcripts) = bridge::channel(call_id);

        let url = self.listen_url();
        let api_key = self.api_key.clone();
        let connect_timeout = Duration::from_secs(self.config.connect_timeout_secs.max(1));
        let keepalive = self.config.keepalive_secs;

        tokio::spawn(async move {
            run_connection(endpoint, url, api_key, connect_timeout, keepalive).await;
        });

        (handle, transcripts)
    }
}

async fn run_connection(
    mut endpoint: BridgeEndpoint,
    url: String,
    api_key: Option<String>,
    connect_timeout: Duration,
    keepalive_secs: u64,
) {
    let call_id = endpoint.call_id.clone();

    let Some(api_key) = api_key else {
        error!(call_id = %call_id, "No transcription API key configured");
        endpoint.mark_error();
        return;
    };

    let mut request = match url.as_str().into_client_request() {
        Ok(r) => r,
        Err(e) => {
            error!(call_id = %call_id, %e, "Invalid transcription URL");
            endpoint.mark_error();
            return;
        }
    };
    match HeaderValue::from_str(&format!("Token {api_key}")) {
        Ok(value) => {
            request.headers_mut().insert("Authorization", value);
        }
        Err(e) => {
            error!(call_id = %call_id, %e, "Invalid transcription API key");
            endpoint.mark_error();
            return;
        }
    }

    debug!(call_id = %call_id, %url, "Connecting to transcription service");

    let connected = tokio::select! {
        _ = endpoint.cancel.cancelled() => {
            debug!(call_id = %call_id, "Closed before transcription connected");
            return;
        }
        res = tokio::time::timeout(connect_timeout, connect_async(request)) => res,
    };

    let ws = match connected {
        Ok(Ok((ws, _response))) => ws,
        Ok(Err(e)) => {
            error!(call_id = %call_id, %e, "Transcription connection failed");
            endpoint.mark_error();
            return;
        }
        Err(_) => {
            error!(call_id = %call_id, timeout_secs = connect_timeout.as_secs(), "Transcription connection timed out");
            endpoint.mark_error();
            return;
        }
    };

    let (mut ws_tx, mut ws_rx) = ws.split();

    if !endpoint.mark_open() {
        let _ = ws_tx.close().await;
        return;
    }
    info!(call_id = %call_id, "Transcription connection open");

    let mut keepalive = (keepalive_secs > 0).then(|| {
        let period = Duration::from_secs(keepalive_secs);
        tokio::time::interval_at(Instant::now() + period, period)
    });

    loop {
        tokio::select! {
            _ = endpoint.cancel.cancelled() => {
                let _ = ws_tx.send(Message::Text(CLOSE_STREAM_MESSAGE.into())).await;
                let _ = ws_tx.close().await;
                debug!(call_id = %call_id, "Transcription connection released");
                break;
            }
            frame = endpoint.audio_rx.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = ws_tx.send(Message::Binary(frame.into())).await {
                        error!(call_id = %call_id, %e, "Failed to forward audio");
                        endpoint.mark_error();
                        break;
                    }
                }
                None => {
                    let _ = ws_tx.send(Message::Text(CLOSE_STREAM_MESSAGE.into())).await;
                    let _ = ws_tx.close().await;
                    endpoint.mark_closed();
                    break;
                }
            },
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Some(transcript) = decode_transcript(text.as_str()) {
                        debug!(call_id = %call_id, %transcript, "Transcript received");
                        endpoint.deliver(transcript);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    warn!(call_id = %call_id, ?frame, "Transcription connection closed by provider");
                    endpoint.mark_closed();
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(call_id = %call_id, %e, "Transcription connection error");
                    endpoint.mark_error();
                    break;
                }
                None => {
                    warn!(call_id = %call_id, "Transcription connection dropped");
                    endpoint.mark_closed();
                    break;
                }
            },
            _ = next_tick(&mut keepalive) => {
                if let Err(e) = ws_tx.send(Message::Text(KEEPALIVE_MESSAGE.into())).await {
                    error!(call_id = %call_id, %e, "Failed to send keepalive");
                    endpoint.mark_error();
                    break;
                }
            }
        }
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
