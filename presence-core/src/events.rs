//! Wire format of messages delivered over the presence channel
//!
//! One JSON object per message, discriminated by its `type` field.

use crate::types::{Emotion, SessionState, Viseme};
use serde::{Deserialize, Serialize};

/// Inbound message from the agent server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    /// Server-authoritative state override
    State { value: SessionState },
    Emotion { value: Emotion },
    /// Direct intensity override for the UI, 0..1
    Intensity { value: f64 },
    /// `sr` is a JSON number; `24000` and `24000.0` are equivalent
    TtsBegin { id: String, sr: f64 },
    /// Base64 of little-endian f32 samples
    TtsChunk { id: String, ts: f64, pcm: String },
    TtsEnd { id: String },
    Viseme { at: f64, id: String, strength: f64 },
    /// Any tag this client does not understand
    #[serde(other)]
    Unknown,
}

impl InboundEvent {
    pub fn tag(&self) -> &'static str {
        match self {
            InboundEvent::State { .. } => "state",
            InboundEvent::Emotion { .. } => "emotion",
            InboundEvent::Intensity { .. } => "intensity",
            InboundEvent::TtsBegin { .. } => "tts_begin",
            InboundEvent::TtsChunk { .. } => "tts_chunk",
            InboundEvent::TtsEnd { .. } => "tts_end",
            InboundEvent::Viseme { .. } => "viseme",
            InboundEvent::Unknown => "unknown",
        }
    }

    /// Parse a single text message
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn viseme(&self) -> Option<Viseme> {
        match self {
            InboundEvent::Viseme { at, id, strength } => Some(Viseme {
                at: *at,
                id: id.clone(),
                strength: *strength,
            }),
            _ => None,
        }
    }
}
