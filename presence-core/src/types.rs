//! Externally observable agent state

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Agent session state as rendered by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Listening,
    Thinking,
    Speaking,
    Error,
}

impl SessionState {
    pub const ALL: [SessionState; 5] = [
        SessionState::Idle,
        SessionState::Listening,
        SessionState::Thinking,
        SessionState::Speaking,
        SessionState::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Listening => "listening",
            SessionState::Thinking => "thinking",
            SessionState::Speaking => "speaking",
            SessionState::Error => "error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SessionState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("Unknown session state: {}", s))
    }
}

/// Emotion shown by the avatar, tracked independently of the session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    #[default]
    Neutral,
    Mischief,
    Annoyed,
    Warm,
    Deadpan,
}

impl Emotion {
    pub const ALL: [Emotion; 5] = [
        Emotion::Neutral,
        Emotion::Mischief,
        Emotion::Annoyed,
        Emotion::Warm,
        Emotion::Deadpan,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Neutral => "neutral",
            Emotion::Mischief => "mischief",
            Emotion::Annoyed => "annoyed",
            Emotion::Warm => "warm",
            Emotion::Deadpan => "deadpan",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Emotion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Emotion::ALL
            .iter()
            .copied()
            .find(|emotion| emotion.as_str() == s)
            .ok_or_else(|| format!("Unknown emotion: {}", s))
    }
}

/// Mouth-shape cue for the rendering collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Viseme {
    /// Offset into the utterance, in seconds
    pub at: f64,
    pub id: String,
    pub strength: f64,
}
