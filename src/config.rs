//! Client configuration
//!
//! All settings have defaults so a config file only needs the fields that
//! differ. Files are TOML; the default location is the platform config
//! directory (e.g. `~/.config/character-voice-client/client.toml`).

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::ConfigError;

/// Environment variable that overrides `api_key`.
pub const API_KEY_ENV: &str = "CHARACTER_API_KEY";

/// Top-level client configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Service endpoint, e.g. `wss://live.example.com/socket.io/`
    pub endpoint: String,
    pub api_key: String,
    pub character_id: String,
    /// Player identifier; a random UUID is used when empty
    pub player_id: String,
    /// Multiplexing namespace for the session
    pub namespace: String,
    pub engine: EngineConfig,
    pub reconnect: ReconnectConfig,
    pub capture: CaptureConfig,
    pub playback: PlaybackConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            character_id: String::new(),
            player_id: String::new(),
            namespace: "/".to_string(),
            engine: EngineConfig::default(),
            reconnect: ReconnectConfig::default(),
            capture: CaptureConfig::default(),
            playback: PlaybackConfig::default(),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("endpoint", &self.endpoint)
            .field(
                "api_key",
                &format_args!("<redacted:{} bytes>", self.api_key.len()),
            )
            .field("character_id", &self.character_id)
            .field("player_id", &self.player_id)
            .field("namespace", &self.namespace)
            .field("engine", &self.engine)
            .field("reconnect", &self.reconnect)
            .field("capture", &self.capture)
            .field("playback", &self.playback)
            .finish()
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file, applying the API key override.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: ClientConfig = toml::from_str(&text)?;
        config.apply_env();
        config.fill_player_id();
        Ok(config)
    }

    /// Load from the default location, or fall back to defaults if no file exists.
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => {
                tracing::debug!("No config file found, using defaults");
                let mut config = Self::default();
                config.apply_env();
                config.fill_player_id();
                Ok(config)
            }
        }
    }

    /// Platform-specific default config file path
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "character-voice-client")
            .map(|dirs| dirs.config_dir().join("client.toml"))
    }

    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.is_empty() {
                self.api_key = key;
            }
        }
    }

    fn fill_player_id(&mut self) {
        if self.player_id.is_empty() {
            self.player_id = uuid::Uuid::new_v4().to_string();
        }
    }

    /// Check the configuration is usable for a connection
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.is_empty() {
            return Err(ConfigError::Invalid("endpoint is empty".into()));
        }
        if !(self.endpoint.starts_with("ws://") || self.endpoint.starts_with("wss://")) {
            return Err(ConfigError::Invalid(format!(
                "endpoint must be a ws:// or wss:// URL: {}",
                self.endpoint
            )));
        }
        if self.character_id.is_empty() {
            return Err(ConfigError::Invalid("character_id is empty".into()));
        }
        if !self.namespace.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "namespace must start with '/': {}",
                self.namespace
            )));
        }
        self.engine.validate()?;
        self.capture.validate()?;
        if self.playback.queue_capacity == 0 {
            return Err(ConfigError::Invalid("playback.queue_capacity is 0".into()));
        }
        Ok(())
    }
}

/// Protocol engine limits and deadlines
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Deadline for an acknowledgment, measured from the send call
    pub ack_timeout_ms: u64,
    /// Deadline for the server's open and connect replies
    pub handshake_timeout_ms: u64,
    /// Sends queued while not connected; the oldest is dropped beyond this
    pub outbound_queue_depth: usize,
    /// Upper bound on attachments declared by one inbound packet
    pub max_attachments: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT_MS,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            outbound_queue_depth: DEFAULT_OUTBOUND_QUEUE_DEPTH,
            max_attachments: DEFAULT_MAX_ATTACHMENTS,
        }
    }
}

impl EngineConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.outbound_queue_depth == 0 {
            return Err(ConfigError::Invalid("engine.outbound_queue_depth is 0".into()));
        }
        if self.ack_timeout_ms == 0 || self.handshake_timeout_ms == 0 {
            return Err(ConfigError::Invalid("engine timeouts must be non-zero".into()));
        }
        Ok(())
    }
}

/// Reconnection backoff policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Attempts before giving up; 0 disables reconnection
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Randomize each delay by up to +/-25%
    pub jitter: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

/// How captured audio is grouped into chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkMode {
    /// Emit every supplied frame immediately
    Immediate,
    /// Accumulate until `buffer_ms` of audio is available
    Buffered,
}

/// Capture chunking policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub mode: ChunkMode,
    pub buffer_ms: u32,
    pub vad: Option<VadConfig>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            mode: ChunkMode::Buffered,
            buffer_ms: DEFAULT_CHUNK_MS,
            vad: None,
        }
    }
}

impl CaptureConfig {
    pub fn immediate() -> Self {
        Self {
            mode: ChunkMode::Immediate,
            ..Default::default()
        }
    }

    pub fn buffered(buffer_ms: u32) -> Self {
        Self {
            mode: ChunkMode::Buffered,
            buffer_ms,
            vad: None,
        }
    }

    /// Samples per chunk in buffered mode
    pub fn chunk_samples(&self) -> usize {
        (CAPTURE_SAMPLE_RATE as usize * self.buffer_ms as usize) / 1000
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.mode == ChunkMode::Buffered && self.chunk_samples() == 0 {
            return Err(ConfigError::Invalid("capture.buffer_ms is too small".into()));
        }
        if let Some(vad) = &self.vad {
            if vad.end_threshold > vad.start_threshold {
                return Err(ConfigError::Invalid(
                    "capture.vad.end_threshold must not exceed start_threshold".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Voice-activity gate thresholds (RMS of normalized samples)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// Gate opens when a frame's energy reaches this level
    pub start_threshold: f32,
    /// Gate may close once energy stays below this level
    pub end_threshold: f32,
    /// How long energy must stay below `end_threshold` before closing
    pub hangover_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            start_threshold: 0.02,
            end_threshold: 0.01,
            hangover_ms: 300,
        }
    }
}

/// Playback queue policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Discard queued audio when a new response stream starts
    pub auto_interrupt: bool,
    /// Maximum queued segments
    pub queue_capacity: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            auto_interrupt: true,
            queue_capacity: DEFAULT_PLAYBACK_QUEUE_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ClientConfig {
        ClientConfig {
            endpoint: "wss://live.example.com/socket.io/".into(),
            api_key: "secret-key".into(),
            character_id: "char-1".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.namespace, "/");
        assert!(config.playback.auto_interrupt);
        assert_eq!(config.capture.mode, ChunkMode::Buffered);
        assert_eq!(config.capture.chunk_samples(), 1600);
    }

    #[test]
    fn test_validate() {
        assert!(valid().validate().is_ok());

        let mut config = valid();
        config.endpoint = "http://example.com".into();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.character_id.clear();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.engine.outbound_queue_depth = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_partial_toml() {
        let text = r#"
            endpoint = "ws://localhost:3000/socket.io/"
            character_id = "abc"

            [capture]
            mode = "immediate"

            [capture.vad]
            start_threshold = 0.05

            [reconnect]
            max_attempts = 2
        "#;
        let config: ClientConfig = toml::from_str(text).unwrap();
        assert_eq!(config.capture.mode, ChunkMode::Immediate);
        assert_eq!(config.reconnect.max_attempts, 2);
        assert_eq!(config.reconnect.initial_delay_ms, 500);
        let vad = config.capture.vad.unwrap();
        assert_eq!(vad.start_threshold, 0.05);
        assert_eq!(vad.hangover_ms, 300);
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let rendered = format!("{:?}", valid());
        assert!(!rendered.contains("secret-key"));
        assert!(rendered.contains("<redacted:10 bytes>"));
    }

    #[test]
    fn test_load_missing_file() {
        let result = ClientConfig::load("/nonexistent/client.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
