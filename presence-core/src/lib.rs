//! presence-core: shared vocabulary for the presence pipeline
//!
//! - Session state and emotion enums
//! - The typed wire format of inbound messages
//! - Layered configuration (file, environment, validation)

pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::{
    BroadcasterConfig, ConfigError, ConnectionConfig, IntensityConfig, LogLevel, PlaybackConfig,
    PresenceConfig, SessionConfig, UtterancePolicy, OUTPUT_SAMPLE_RATE,
};
pub use error::{Error, Result};
pub use events::InboundEvent;
pub use types::{Emotion, SessionState, Viseme};
