//! Media pipeline: per-call transcription connections.

pub mod bridge;
pub mod stt;

pub use bridge::{BridgeEndpoint, BridgeState, TranscriptReceiver, TranscriptionBridge, TranscriptionHandle};
pub use stt::DeepgramBridge;
