//! Deepgram bridge tests against a local WebSocket server that speaks the
//! live-transcription message shape.
//!
//! Run with: `cargo test -p ivr-pilot-media --test deepgram_bridge`

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;

use ivr_pilot_core::config::TranscriptionConfig;
use ivr_pilot_media::{BridgeState, DeepgramBridge, TranscriptionBridge};

/// What the fake service observed.
#[derive(Debug)]
enum Seen {
    Audio(Vec<u8>),
    Text(String),
}

fn results(transcript: &str) -> String {
    serde_json::json!({
        "type": "Results",
        "is_final": true,
        "channel": { "alternatives": [ { "transcript": transcript, "confidence": 0.99 } ] }
    })
    .to_string()
}

/// Start a fake transcription service. For every binary frame received it
/// replies with the next scripted message.
async fn start_fake_service(
    script: Vec<String>,
) -> (String, mpsc::UnboundedReceiver<Seen>, Arc<Mutex<Option<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();
    let auth = Arc::new(Mutex::new(None));
    let auth_clone = auth.clone();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
            let header = req
                .headers()
                .get("Authorization")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());
            *auth_clone.lock().unwrap() = header;
            Ok(resp)
        })
        .await
        .unwrap();

        let (mut tx, mut rx) = ws.split();
        let mut script = script.into_iter();
        while let Some(Ok(msg)) = rx.next().await {
            match msg {
                Message::Binary(data) => {
                    let _ = seen_tx.send(Seen::Audio(data.to_vec()));
                    if let Some(reply) = script.next() {
                        tx.send(Message::Text(reply.into())).await.unwrap();
                    }
                }
                Message::Text(text) => {
                    let _ = seen_tx.send(Seen::Text(text.to_string()));
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    (format!("ws://{addr}/v1/listen"), seen_rx, auth)
}

fn bridge_for(url: &str) -> DeepgramBridge {
    DeepgramBridge::new(TranscriptionConfig {
        url: url.into(),
        api_key: Some("test-key".into()),
        api_key_env: None,
        keepalive_secs: 0,
        ..Default::default()
    })
}

#[tokio::test]
async fn test_forwards_audio_and_delivers_lowercased_transcripts() {
    let (url, mut seen, auth) = start_fake_service(vec![
        results("Please Enter Employee ID"),
        results(""),
        r#"{"type":"Metadata","request_id":"abc"}"#.to_string(),
        results("Enter a Member ID"),
    ])
    .await;

    let bridge = bridge_for(&url);
    let (handle, mut transcripts) = bridge.open("CA1");

    // Frames sent before the socket opens are queued, in order.
    for i in 0..4u8 {
        assert!(handle.forward_audio(vec![i; 160]));
    }

    for i in 0..4u8 {
        match tokio::time::timeout(Duration::from_secs(5), seen.recv()).await.unwrap() {
            Some(Seen::Audio(frame)) => assert_eq!(frame, vec![i; 160]),
            other => panic!("expected audio frame {i}, got {other:?}"),
        }
    }

    let first = tokio::time::timeout(Duration::from_secs(5), transcripts.recv())
        .await
        .unwrap();
    assert_eq!(first.as_deref(), Some("please enter employee id"));

    // Empty and metadata messages are dropped silently.
    let second = tokio::time::timeout(Duration::from_secs(5), transcripts.recv())
        .await
        .unwrap();
    assert_eq!(second.as_deref(), Some("enter a member id"));

    assert_eq!(handle.state(), BridgeState::Open);
    assert_eq!(auth.lock().unwrap().as_deref(), Some("Token test-key"));
}

#[tokio::test]
async fn test_close_sends_close_stream_and_stops_forwarding() {
    let (url, mut seen, _auth) = start_fake_service(vec![]).await;

    let bridge = bridge_for(&url);
    let (handle, mut transcripts) = bridge.open("CA2");

    let mut state = handle.subscribe();
    while *state.borrow() != BridgeState::Open {
        tokio::time::timeout(Duration::from_secs(5), state.changed())
            .await
            .unwrap()
            .unwrap();
    }

    handle.close();
    handle.close();
    assert_eq!(handle.state(), BridgeState::Closed);
    assert!(!handle.forward_audio(vec![0; 160]));

    match tokio::time::timeout(Duration::from_secs(5), seen.recv()).await.unwrap() {
        Some(Seen::Text(text)) => assert!(text.contains("CloseStream")),
        other => panic!("expected CloseStream, got {other:?}"),
    }

    let end = tokio::time::timeout(Duration::from_secs(5), transcripts.recv())
        .await
        .unwrap();
    assert!(end.is_none());
}

#[tokio::test]
async fn test_provider_close_ends_transcripts() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.close(None).await.ok();
    });

    let bridge = bridge_for(&format!("ws://{addr}/v1/listen"));
    let (handle, mut transcripts) = bridge.open("CA3");

    let end = tokio::time::timeout(Duration::from_secs(5), transcripts.recv())
        .await
        .unwrap();
    assert!(end.is_none());
    assert!(handle.state().is_terminal());
    assert!(!handle.forward_audio(vec![0; 160]));
}
