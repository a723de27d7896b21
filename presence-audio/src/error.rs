//! Error types for presence-audio

use presence_core::Error as CoreError;
use thiserror::Error;

/// Audio decoding and playback errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Malformed chunk: {0}")]
    MalformedChunk(String),

    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Audio stream error: {0}")]
    Stream(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl From<AudioError> for CoreError {
    fn from(err: AudioError) -> Self {
        CoreError::Audio(err.to_string())
    }
}
