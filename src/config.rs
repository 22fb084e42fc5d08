//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! It also owns the per-request [`GenerationConfig`]: the `[generation]` section of the
//! application config provides the process-wide defaults, and every request's partial
//! `config` object is completed against them with [`PartialGenerationConfig::fill_defaults`].
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER__HOST, APP_STREAMING__CHUNK_TIMEOUT_SECS, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impls)

use anyhow::Result;              // Better error handling with context
use serde::{Deserialize, Serialize};  // For converting to/from TOML, JSON, etc.
use std::env;                    // For reading environment variables
use std::time::Duration;

/// Languages the bundled voices are tuned for. Other values are passed through to the
/// generator untouched, with a warning.
pub const SUPPORTED_LANGUAGES: &[&str] = &[
    "spanish",
    "english",
    "french",
    "german",
    "italian",
    "portuguese",
];

/// Emotions the bundled voices are tuned for.
pub const SUPPORTED_EMOTIONS: &[&str] = &[
    "neutral",
    "happy",
    "sad",
    "angry",
    "excited",
    "calm",
    "friendly",
    "professional",
];

/// Generator backends that can be selected with `generator.backend`.
pub const SUPPORTED_BACKENDS: &[&str] = &["tone"];

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (server, generation, audio, streaming)
/// keeps each concern small and lets the config crate map nested TOML tables and
/// environment variables onto them directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub generation: GenerationConfig,
    pub audio: AudioConfig,
    pub streaming: StreamingConfig,
    pub websocket: WebSocketConfig,
    pub generator: GeneratorConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Load the generator at startup instead of on the first request
    pub warm_up: bool,
}

/// Output audio format. The wire protocol only carries mono 16-bit PCM, so `channels`
/// and `bit_depth` exist to be validated rather than tuned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
}

/// Settings for the worker/consumer hand-off used by every generation request.
///
/// ## Fields:
/// - `chunk_timeout_secs`: How long the connection waits for the next chunk before
///   reporting a timeout to the client
/// - `channel_capacity`: Maximum number of chunk events buffered between the worker
///   and the connection before the worker has to wait
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    pub chunk_timeout_secs: u64,
    pub channel_capacity: usize,
}

impl StreamingConfig {
    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_secs(self.chunk_timeout_secs)
    }
}

/// Protocol-level keepalive for WebSocket connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    pub ping_interval_secs: u64,
    pub ping_timeout_secs: u64,
    /// Messages a client may queue while its session is busy; one more closes the connection
    pub max_pending_messages: usize,
}

impl WebSocketConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// A connection that has been silent for longer than this is considered dead.
    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs + self.ping_timeout_secs)
    }
}

/// Which speech generator backs the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Backend name, see [`SUPPORTED_BACKENDS`]
    pub backend: String,
    /// Length of one generation frame in milliseconds (tone backend)
    pub frame_duration_ms: u32,
}

/// Complete settings for one generation request.
///
/// ## Fields:
/// - `temperature`, `top_p`, `max_tokens`: Sampling controls for the generator
/// - `chunk_size`: Generation frames batched into one emitted chunk
/// - `lookback_frames`: Context frames the audio writer keeps between chunks
/// - `language`, `emotion`, `speed`, `voice_id`: Voice selection
///
/// `chunk_size` and `lookback_frames` are opaque to this server: they are handed to the
/// generator unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub chunk_size: u32,
    pub lookback_frames: u32,
    pub language: String,
    pub emotion: String,
    pub speed: f32,
    pub voice_id: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.6,
            max_tokens: 1200,
            top_p: 0.95,
            chunk_size: 25,
            lookback_frames: 15,
            language: "spanish".to_string(),
            emotion: "neutral".to_string(),
            speed: 1.0,
            voice_id: "default".to_string(),
        }
    }
}

/// The `config` object of a request as it arrives on the wire.
///
/// ## Rust Concepts:
/// - **Option<T>**: Every field may be absent; absence means "use the default"
/// - **#[serde(default)]**: Missing fields deserialize to `None` instead of failing
/// - Unknown fields are ignored, so newer clients can talk to older servers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartialGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lookback_frames: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,
}

impl PartialGenerationConfig {
    /// Complete this partial config with `defaults`.
    ///
    /// This is a pure function: it never fails, and fields that were provided always win.
    pub fn fill_defaults(&self, defaults: &GenerationConfig) -> GenerationConfig {
        GenerationConfig {
            temperature: self.temperature.unwrap_or(defaults.temperature),
            max_tokens: self.max_tokens.unwrap_or(defaults.max_tokens),
            top_p: self.top_p.unwrap_or(defaults.top_p),
            chunk_size: self.chunk_size.unwrap_or(defaults.chunk_size),
            lookback_frames: self.lookback_frames.unwrap_or(defaults.lookback_frames),
            language: self.language.clone().unwrap_or_else(|| defaults.language.clone()),
            emotion: self.emotion.clone().unwrap_or_else(|| defaults.emotion.clone()),
            speed: self.speed.unwrap_or(defaults.speed),
            voice_id: self.voice_id.clone().unwrap_or_else(|| defaults.voice_id.clone()),
        }
    }
}

impl From<&GenerationConfig> for PartialGenerationConfig {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            temperature: Some(config.temperature),
            max_tokens: Some(config.max_tokens),
            top_p: Some(config.top_p),
            chunk_size: Some(config.chunk_size),
            lookback_frames: Some(config.lookback_frames),
            language: Some(config.language.clone()),
            emotion: Some(config.emotion.clone()),
            speed: Some(config.speed),
            voice_id: Some(config.voice_id.clone()),
        }
    }
}

/// Provides default configuration values.
///
/// ## Why defaults matter:
/// Default values ensure the application can start even if no configuration file exists.
/// They also serve as documentation of reasonable starting values.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),  // Localhost only (safe for development)
                port: 8001,
                warm_up: true,
            },
            generation: GenerationConfig::default(),
            audio: AudioConfig {
                sample_rate: 22050,
                channels: 1,
                bit_depth: 16,
            },
            streaming: StreamingConfig {
                chunk_timeout_secs: 30,
                channel_capacity: 32,
            },
            websocket: WebSocketConfig {
                ping_interval_secs: 20,
                ping_timeout_secs: 10,
                max_pending_messages: 32,
            },
            generator: GeneratorConfig {
                backend: "tone".to_string(),
                frame_duration_ms: 40,
            },
        }
    }
}

/// Implementation block for AppConfig - adds methods to the struct.
impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST and PORT environment variables
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=9000`: Override server port
    /// - `APP_GENERATION__LANGUAGE=english`: Change the default language
    /// - `APP_STREAMING__CHUNK_TIMEOUT_SECS=60`: Wait longer for slow generators
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special cases for deployment platforms
    ///
    /// Nested keys use a double underscore because many field names contain single ones.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Generation defaults are checked here once, so that filling a request's partial
    /// config from them can never produce something the generator refuses.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.audio.sample_rate == 0 {
            return Err(anyhow::anyhow!("Audio sample rate must be greater than 0"));
        }

        if self.audio.channels != 1 {
            return Err(anyhow::anyhow!(
                "Only mono output is supported, got {} channels",
                self.audio.channels
            ));
        }

        if self.audio.bit_depth != 16 {
            return Err(anyhow::anyhow!(
                "Only 16-bit output is supported, got {} bits",
                self.audio.bit_depth
            ));
        }

        if self.streaming.chunk_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Chunk timeout must be greater than 0"));
        }

        if self.streaming.channel_capacity == 0 {
            return Err(anyhow::anyhow!("Streaming channel capacity must be greater than 0"));
        }

        if self.websocket.ping_interval_secs == 0 {
            return Err(anyhow::anyhow!("WebSocket ping interval must be greater than 0"));
        }

        if self.websocket.max_pending_messages == 0 {
            return Err(anyhow::anyhow!("WebSocket max pending messages must be greater than 0"));
        }

        if self.generation.chunk_size == 0 {
            return Err(anyhow::anyhow!("Default chunk_size must be greater than 0"));
        }

        if self.generation.speed <= 0.0 {
            return Err(anyhow::anyhow!("Default speed must be greater than 0"));
        }

        if !SUPPORTED_BACKENDS.contains(&self.generator.backend.as_str()) {
            return Err(anyhow::anyhow!(
                "Unknown generator backend '{}' (supported: {})",
                self.generator.backend,
                SUPPORTED_BACKENDS.join(", ")
            ));
        }

        if self.generator.frame_duration_ms == 0 {
            return Err(anyhow::anyhow!("Generator frame duration must be greater than 0"));
        }

        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8001);
        assert_eq!(config.audio.sample_rate, 22050);
        assert_eq!(config.streaming.chunk_timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_generation_defaults() {
        let defaults = GenerationConfig::default();
        assert_eq!(defaults.temperature, 0.6);
        assert_eq!(defaults.max_tokens, 1200);
        assert_eq!(defaults.top_p, 0.95);
        assert_eq!(defaults.chunk_size, 25);
        assert_eq!(defaults.lookback_frames, 15);
        assert_eq!(defaults.language, "spanish");
        assert_eq!(defaults.emotion, "neutral");
        assert_eq!(defaults.speed, 1.0);
        assert_eq!(defaults.voice_id, "default");
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.channels = 2;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.generator.backend = "does-not-exist".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.streaming.channel_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.websocket.max_pending_messages = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_partial_config_is_all_defaults() {
        let partial: PartialGenerationConfig = serde_json::from_str("{}").unwrap();
        let defaults = GenerationConfig::default();
        assert_eq!(partial.fill_defaults(&defaults), defaults);
    }

    #[test]
    fn test_partial_config_keeps_provided_fields() {
        let partial: PartialGenerationConfig = serde_json::from_str(
            r#"{"emotion": "happy", "speed": 1.25, "some_future_knob": true}"#,
        )
        .unwrap();
        let filled = partial.fill_defaults(&GenerationConfig::default());

        assert_eq!(filled.emotion, "happy");
        assert_eq!(filled.speed, 1.25);
        // Everything else falls back
        assert_eq!(filled.language, "spanish");
        assert_eq!(filled.chunk_size, 25);
    }

    #[test]
    fn test_partial_config_round_trips_full_config() {
        let mut config = GenerationConfig::default();
        config.language = "english".to_string();
        let partial = PartialGenerationConfig::from(&config);
        assert_eq!(partial.fill_defaults(&GenerationConfig::default()), config);
    }

    #[test]
    fn test_client_timeout_adds_grace_period() {
        let config = AppConfig::default();
        assert_eq!(config.websocket.ping_interval(), Duration::from_secs(20));
        assert_eq!(config.websocket.client_timeout(), Duration::from_secs(30));
    }
}
