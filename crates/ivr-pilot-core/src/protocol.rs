//! Wire shapes exchanged with the telephony and transcription providers.
//!
//! Inbound media streams use Twilio's JSON-over-WebSocket protocol: one
//! `start`, many `media`, one `stop`, tagged by `event`. From the
//! transcription service only the first alternative's transcript is read.

use serde::{Deserialize, Serialize};

/// One frame of the provider's media stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum MediaStreamEvent {
    Connected {
        #[serde(default)]
        protocol: Option<String>,
    },

    Start {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
        start: StreamStart,
    },

    Media {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
        media: MediaPayload,
    },

    Stop {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
        #[serde(default)]
        stop: Option<StreamStop>,
    },

    /// `mark`, `dtmf` and anything else we do not act on.
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStart {
    pub call_sid: String,
    pub stream_sid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_sid: Option<String>,
    #[serde(default)]
    pub tracks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_format: Option<MediaFormat>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<String>,
    /// Base64 µ-law audio, 8 kHz mono.
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStop {
    #[serde(default)]
    pub call_sid: Option<String>,
    #[serde(default)]
    pub account_sid: Option<String>,
}

impl MediaStreamEvent {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Streaming transcription result. Fields beyond the transcript are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptMessage {
    pub channel: TranscriptChannel,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptChannel {
    #[serde(default)]
    pub alternatives: Vec<TranscriptAlternative>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptAlternative {
    #[serde(default)]
    pub transcript: String,
}

/// Extract the first alternative's transcript, lower-cased.
///
/// Returns `None` for malformed messages, messages of another shape
/// (metadata, utterance end, ...) and empty transcripts.
pub fn decode_transcript(raw: &str) -> Option<String> {
    let message: TranscriptMessage = serde_json::from_str(raw).ok()?;
    let first = message.channel.alternatives.into_iter().next()?;
    let text = first.transcript.trim().to_lowercase();
    if text.is_empty() { None } else { Some(text) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start() {
        let raw = r#"{
            "event": "start",
            "sequenceNumber": "1",
            "start": {
                "accountSid": "AC123",
                "streamSid": "MZ456",
                "callSid": "CA789",
                "tracks": ["inbound"],
                "customParameters": {},
                "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1}
            },
            "streamSid": "MZ456"
        }"#;
        match MediaStreamEvent::parse(raw).unwrap() {
            MediaStreamEvent::Start { stream_sid, start } => {
                assert_eq!(stream_sid.as_deref(), Some("MZ456"));
                assert_eq!(start.call_sid, "CA789");
                assert_eq!(start.stream_sid, "MZ456");
                assert_eq!(start.media_format.unwrap().sample_rate, 8000);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_parse_media_and_stop() {
        let raw = r#"{"event":"media","sequenceNumber":"3","media":{"track":"inbound","chunk":"1","timestamp":"5","payload":"AAEC"},"streamSid":"MZ1"}"#;
        match MediaStreamEvent::parse(raw).unwrap() {
            MediaStreamEvent::Media { media, .. } => assert_eq!(media.payload, "AAEC"),
            other => panic!("unexpected event: {other:?}"),
        }

        let raw = r#"{"event":"stop","sequenceNumber":"9","stop":{"accountSid":"AC1","callSid":"CA1"},"streamSid":"MZ1"}"#;
        match MediaStreamEvent::parse(raw).unwrap() {
            MediaStreamEvent::Stop { stop, .. } => {
                assert_eq!(stop.unwrap().call_sid.as_deref(), Some("CA1"))
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_events_are_other() {
        let raw = r#"{"event":"mark","mark":{"name":"x"},"streamSid":"MZ1"}"#;
        assert_eq!(MediaStreamEvent::parse(raw).unwrap(), MediaStreamEvent::Other);
        let raw = r#"{"event":"connected","protocol":"Call","version":"1.0.0"}"#;
        assert!(matches!(
            MediaStreamEvent::parse(raw).unwrap(),
            MediaStreamEvent::Connected { .. }
        ));
    }

    #[test]
    fn test_malformed_event_is_error() {
        assert!(MediaStreamEvent::parse("not json").is_err());
        assert!(MediaStreamEvent::parse(r#"{"event":"start"}"#).is_err());
        assert!(MediaStreamEvent::parse(r#"{"no_event":1}"#).is_err());
    }

    #[test]
    fn test_decode_transcript() {
        let raw = r#"{"type":"Results","is_final":true,"channel":{"alternatives":[{"transcript":"Please Enter Employee ID","confidence":0.98},{"transcript":"other"}]}}"#;
        assert_eq!(decode_transcript(raw).as_deref(), Some("please enter employee id"));
    }

    #[test]
    fn test_decode_transcript_drops_empty_and_other_shapes() {
        assert_eq!(
            decode_transcript(r#"{"channel":{"alternatives":[{"transcript":""}]}}"#),
            None
        );
        assert_eq!(decode_transcript(r#"{"channel":{"alternatives":[]}}"#), None);
        assert_eq!(decode_transcript(r#"{"type":"Metadata","request_id":"x"}"#), None);
        assert_eq!(
            decode_transcript(r#"{"type":"UtteranceEnd","channel":[0,1]}"#),
            None
        );
        assert_eq!(decode_transcript("garbage"), None);
    }
}
