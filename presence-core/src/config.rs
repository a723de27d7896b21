// Configuration for the presence client, broadcaster and CLI

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Output sample rate required by the device contract
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    pub connection: ConnectionConfig,
    pub playback: PlaybackConfig,
    pub intensity: IntensityConfig,
    pub session: SessionConfig,
    pub broadcaster: BroadcasterConfig,
    pub log_level: LogLevel,
}

/// Log level, kept as a string so it can be fed to an env filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogLevel(pub String);

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel("info".to_string())
    }
}

impl LogLevel {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Network channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// WebSocket URL of the agent server
    pub url: String,
    /// Messages larger than this are dropped
    pub max_message_bytes: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8765".to_string(),
            max_message_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Audio output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub sample_rate: u32,
    /// Samples pulled per render period
    pub frame_size: usize,
    /// Output device name (None = default device)
    pub device_name: Option<String>,
    /// Drive the render clock without an audio device
    pub headless: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: OUTPUT_SAMPLE_RATE,
            frame_size: 480, // 20ms at 24kHz
            device_name: None,
            headless: false,
        }
    }
}

impl PlaybackConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate != OUTPUT_SAMPLE_RATE {
            return Err(format!(
                "Sample rate must be {} Hz (no resampling), got {}",
                OUTPUT_SAMPLE_RATE, self.sample_rate
            ));
        }

        if self.frame_size == 0 {
            return Err("Frame size must be greater than 0".to_string());
        }

        if self.frame_size > 16384 {
            return Err("Frame size too large (max 16384)".to_string());
        }

        if let Some(ref name) = self.device_name {
            if name.is_empty() || name.len() > 256 {
                return Err("Device name must be 1-256 characters".to_string());
            }
        }

        Ok(())
    }

    /// Duration of one render period
    pub fn period(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.frame_size as f64 / self.sample_rate as f64)
    }
}

/// Loudness feature configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntensityConfig {
    /// Rolling window of rendered samples
    pub window_size: usize,
    pub gain: f32,
    /// UI sampling rate (display refresh)
    pub tick_hz: u32,
    /// How long an `intensity` override wins over the extracted value
    pub override_hold_ms: u64,
}

impl Default for IntensityConfig {
    fn default() -> Self {
        Self {
            window_size: 2048,
            gain: 8.0,
            tick_hz: 60,
            override_hold_ms: 250,
        }
    }
}

impl IntensityConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.window_size == 0 || self.window_size > 65536 {
            return Err("Intensity window must be between 1 and 65536 samples".to_string());
        }

        if !self.gain.is_finite() || self.gain <= 0.0 {
            return Err("Intensity gain must be a positive finite number".to_string());
        }

        if self.tick_hz == 0 || self.tick_hz > 1000 {
            return Err("Tick rate must be between 1 and 1000 Hz".to_string());
        }

        Ok(())
    }

    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.tick_hz.max(1) as f64)
    }
}

/// What happens to queued audio when a new utterance begins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UtterancePolicy {
    /// Keep playing residual audio; accept chunks of any stream
    Append,
    /// Flush residual audio on a new stream id and drop stale chunks
    #[default]
    Interrupt,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub utterance_policy: UtterancePolicy,
}

/// Server-side broadcaster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcasterConfig {
    pub bind_address: String,
    pub port: u16,
    /// Messages buffered per client before it starts lagging
    pub channel_capacity: usize,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8765,
            channel_capacity: 1024,
        }
    }
}

impl BroadcasterConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("Broadcaster port cannot be 0".to_string());
        }
        if self.channel_capacity == 0 {
            return Err("Broadcaster channel capacity must be greater than 0".to_string());
        }
        if self.bind_address.is_empty() {
            return Err("Broadcaster bind address cannot be empty".to_string());
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for crate::Error {
    fn from(err: ConfigError) -> Self {
        crate::Error::Configuration(err.to_string())
    }
}

impl PresenceConfig {
    /// Load configuration from a JSON, TOML or YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;
        Self::from_str(&content)
    }

    /// Load configuration from a string, trying JSON, then TOML, then YAML
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        if let Ok(config) = serde_json::from_str::<PresenceConfig>(content) {
            return Ok(config);
        }

        if let Ok(config) = toml::from_str::<PresenceConfig>(content) {
            return Ok(config);
        }

        if let Ok(config) = serde_yaml::from_str::<PresenceConfig>(content) {
            return Ok(config);
        }

        Err(ConfigError::ParseError("Unknown format".to_string()))
    }

    /// Defaults overlaid with environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Overlay `PRESENCE_*` environment variables onto this configuration
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("PRESENCE_WS_URL") {
            self.connection.url = url;
        }

        if let Ok(level) = std::env::var("PRESENCE_LOG_LEVEL") {
            self.log_level = LogLevel(level);
        }

        if let Ok(headless) = std::env::var("PRESENCE_HEADLESS") {
            self.playback.headless = matches!(headless.as_str(), "1" | "true" | "yes");
        }

        if let Ok(port) = std::env::var("PRESENCE_BROADCAST_PORT") {
            if let Ok(p) = port.parse::<u16>() {
                self.broadcaster.port = p;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = &self.connection.url;
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(ConfigError::ValidationError(format!(
                "connection.url must be a ws:// or wss:// URL, got '{}'",
                url
            )));
        }

        if self.connection.max_message_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "connection.max_message_bytes must be > 0".to_string(),
            ));
        }

        self.playback.validate().map_err(ConfigError::ValidationError)?;
        self.intensity.validate().map_err(ConfigError::ValidationError)?;
        self.broadcaster.validate().map_err(ConfigError::ValidationError)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PresenceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.playback.sample_rate, 24_000);
        assert_eq!(config.intensity.window_size, 2048);
        assert_eq!(config.intensity.gain, 8.0);
        assert_eq!(config.session.utterance_policy, UtterancePolicy::Interrupt);
    }

    #[test]
    fn test_period_of_default_frame() {
        let config = PlaybackConfig::default();
        assert_eq!(config.period(), std::time::Duration::from_millis(20));
    }
}
