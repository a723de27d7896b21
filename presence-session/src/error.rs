//! Error types for presence-session

use presence_audio::AudioError;
use presence_core::Error as CoreError;
use thiserror::Error;

/// Session, routing and transport errors
#[derive(Error, Debug)]
pub enum PresenceError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl From<PresenceError> for CoreError {
    fn from(err: PresenceError) -> Self {
        CoreError::Session(err.to_string())
    }
}
